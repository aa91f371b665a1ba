//! Carries deployment templates out against the compute gateway.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::compute::{instance_detail_url, ssh_url, ComputeGateway};
use crate::error::ControlResult;
use crate::types::Demo;

use super::template::{DeploymentTemplate, SingleInstanceDeployment};

/// Metadata key for the console detail page.
pub const INSTANCE_DETAIL_URL_KEY: &str = "instanceDetailURL";

/// Metadata key for the browser SSH session.
pub const SSH_URL_KEY: &str = "sshURL";

/// Remote state observed for a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    /// Remote status string.
    pub status: Option<String>,
    /// Derived metadata, such as console URLs.
    pub metadata: BTreeMap<String, String>,
}

/// Launches, tears down and reconciles deployments.
///
/// No remote call is retried here; resubmission is left to the caller. Launch
/// is re-entrant: resources that already exist remotely are adopted rather
/// than created again, so a launch whose status write failed can be repeated.
pub struct DeploymentManager {
    gateway: Arc<dyn ComputeGateway>,
    project_id: String,
}

impl DeploymentManager {
    /// Create a new deployment manager.
    pub fn new(gateway: Arc<dyn ComputeGateway>, project_id: impl Into<String>) -> Self {
        Self {
            gateway,
            project_id: project_id.into(),
        }
    }

    /// Provision everything `template` describes that does not exist yet.
    pub async fn launch(&self, template: &DeploymentTemplate) -> ControlResult<()> {
        template.launch(self).await
    }

    /// Release everything `template` describes.
    pub async fn teardown(&self, template: &DeploymentTemplate) -> ControlResult<()> {
        template.teardown(self).await
    }

    /// Refresh the demo's synthetic deployment fields from remote state.
    ///
    /// Leaves the fields untouched when nothing exists remotely.
    pub async fn reconcile(&self, demo: &mut Demo) -> ControlResult<()> {
        if let Some(observation) = demo.deployment_template.reconcile(self).await? {
            demo.deployment_status = observation.status;
            demo.deployment_metadata = observation.metadata;
        }
        Ok(())
    }

    pub(super) async fn launch_single_instance(
        &self,
        deployment: &SingleInstanceDeployment,
    ) -> ControlResult<()> {
        let spec = &deployment.instance_template;
        if let Some(live) = self.gateway.get_instance(spec).await? {
            info!(
                instance = %spec.name,
                zone = %spec.zone,
                status = live.status.as_deref().unwrap_or("UNKNOWN"),
                "instance already exists, skipping create"
            );
            return Ok(());
        }

        info!(instance = %spec.name, zone = %spec.zone, "launching instance");
        self.gateway.create_instance(spec).await
    }

    pub(super) async fn teardown_single_instance(
        &self,
        deployment: &SingleInstanceDeployment,
    ) -> ControlResult<()> {
        let spec = &deployment.instance_template;
        match self.gateway.get_instance(spec).await? {
            Some(live) => {
                info!(instance = %live.name, zone = %spec.zone, "deleting instance");
                self.gateway.delete_instance(&live).await
            }
            None => {
                info!(
                    instance = %spec.name,
                    zone = %spec.zone,
                    "instance not found during teardown"
                );
                Ok(())
            }
        }
    }

    pub(super) async fn observe_single_instance(
        &self,
        deployment: &SingleInstanceDeployment,
    ) -> ControlResult<Option<Observation>> {
        let spec = &deployment.instance_template;
        let Some(live) = self.gateway.get_instance(spec).await? else {
            debug!(instance = %spec.name, "no remote instance to reconcile");
            return Ok(None);
        };

        let metadata = BTreeMap::from([
            (
                INSTANCE_DETAIL_URL_KEY.to_owned(),
                instance_detail_url(&self.project_id, &spec.zone, &spec.name),
            ),
            (
                SSH_URL_KEY.to_owned(),
                ssh_url(&self.project_id, &spec.zone, &spec.name),
            ),
        ]);

        Ok(Some(Observation {
            status: live.status,
            metadata,
        }))
    }
}

impl std::fmt::Debug for DeploymentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentManager")
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}
