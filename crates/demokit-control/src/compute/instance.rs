//! Compute instance specifications and console URL helpers.

use serde::{Deserialize, Serialize};

use crate::config::ComputeConfig;

/// Scope every demo instance's service account is granted.
pub const COMPUTE_SCOPE: &str = "https://www.googleapis.com/auth/compute";

const API_ROOT: &str = "https://www.googleapis.com/compute/v1";

/// A compute instance, shaped like the remote API's instance resource.
///
/// Stored opaquely inside a deployment template and sent as-is on create.
/// `status` is only ever filled in by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    /// Instance name, unique per project and zone.
    pub name: String,
    /// Zone name, e.g. `us-central1-a`.
    pub zone: String,
    /// Fully qualified machine type URL.
    pub machine_type: String,
    /// Attached disks; the first is the boot disk.
    #[serde(default)]
    pub disks: Vec<AttachedDisk>,
    /// Network interfaces.
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
    /// Host maintenance and restart policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<Scheduling>,
    /// Service identities available to the instance.
    #[serde(default)]
    pub service_accounts: Vec<ServiceAccount>,
    /// Network tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    /// Remote status, e.g. `RUNNING`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A disk attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    /// Whether this is the boot disk.
    pub boot: bool,
    /// Disk type, e.g. `PERSISTENT`.
    #[serde(rename = "type")]
    pub disk_type: String,
    /// Access mode, e.g. `READ_WRITE`.
    pub mode: String,
    /// Delete the disk along with the instance.
    pub auto_delete: bool,
    /// Parameters used to create the disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialize_params: Option<DiskInitializeParams>,
}

/// Disk creation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskInitializeParams {
    /// Fully qualified source image URL.
    pub source_image: String,
}

/// A network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Fully qualified network URL.
    pub network: String,
    /// External access configurations.
    #[serde(default)]
    pub access_configs: Vec<AccessConfig>,
}

/// External access for a network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    /// Display name.
    pub name: String,
    /// Access type, e.g. `ONE_TO_ONE_NAT`.
    #[serde(rename = "type")]
    pub access_type: String,
}

/// Scheduling policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scheduling {
    /// Restart the instance if it is terminated by the platform.
    pub automatic_restart: bool,
    /// `MIGRATE` or `TERMINATE`.
    pub on_host_maintenance: String,
}

/// A service account attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    /// Account email, or `default`.
    pub email: String,
    /// OAuth scopes granted.
    pub scopes: Vec<String>,
}

/// Network tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags {
    /// Tag values.
    pub items: Vec<String>,
}

impl InstanceSpec {
    /// Build the default demo instance called `name`.
    #[must_use]
    pub fn with_defaults(name: impl Into<String>, config: &ComputeConfig) -> Self {
        let project_url = format!("{API_ROOT}/projects/{}", config.project_id);
        let image_url = format!(
            "{API_ROOT}/projects/{}/global/images/{}",
            config.image_project, config.image
        );

        let mut scopes = config.extra_scopes.clone();
        scopes.push(COMPUTE_SCOPE.to_owned());

        Self {
            name: name.into(),
            zone: config.zone.clone(),
            machine_type: format!(
                "{project_url}/zones/{}/machineTypes/{}",
                config.zone, config.machine_type
            ),
            disks: vec![AttachedDisk {
                boot: true,
                disk_type: "PERSISTENT".to_owned(),
                mode: "READ_WRITE".to_owned(),
                auto_delete: true,
                initialize_params: Some(DiskInitializeParams {
                    source_image: image_url,
                }),
            }],
            network_interfaces: vec![NetworkInterface {
                network: format!("{project_url}/global/networks/default"),
                access_configs: vec![AccessConfig {
                    name: "External NAT".to_owned(),
                    access_type: "ONE_TO_ONE_NAT".to_owned(),
                }],
            }],
            scheduling: Some(Scheduling {
                automatic_restart: true,
                on_host_maintenance: "MIGRATE".to_owned(),
            }),
            service_accounts: vec![ServiceAccount {
                email: "default".to_owned(),
                scopes,
            }],
            tags: (!config.tags.is_empty()).then(|| Tags {
                items: config.tags.clone(),
            }),
            status: None,
        }
    }
}

/// Console page showing the instance.
#[must_use]
pub fn instance_detail_url(project: &str, zone: &str, name: &str) -> String {
    format!(
        "https://console.developers.google.com/project/{project}/compute/instancesDetail/zones/{zone}/instances/{name}"
    )
}

/// Browser SSH session into the instance.
#[must_use]
pub fn ssh_url(project: &str, zone: &str, name: &str) -> String {
    format!("https://cloudssh.developers.google.com/projects/{project}/zones/{zone}/instances/{name}")
}
