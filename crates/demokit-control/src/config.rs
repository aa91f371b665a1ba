//! Configuration for demokit-control.

use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::error::{ControlError, ControlResult};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DemokitConfig {
    /// Document store configuration.
    #[serde(default)]
    pub datastore: DatastoreConfig,

    /// Transaction retry behaviour.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Remote compute API configuration.
    #[serde(default)]
    pub compute: ComputeConfig,
}

impl DemokitConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `demokit.toml` in the current directory (if present)
    /// 3. Environment variables with `DEMOKIT_` prefix
    pub fn load() -> ControlResult<Self> {
        Self::from_file("demokit.toml")
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DEMOKIT_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// Which document store backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatastoreBackend {
    /// In-process store. Data does not survive a restart.
    #[default]
    Memory,

    /// PostgreSQL-backed store.
    Postgres,
}

/// Document store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatastoreConfig {
    /// Backend to use.
    #[serde(default)]
    pub backend: DatastoreBackend,

    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "postgres://localhost/demokit".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            backend: DatastoreBackend::default(),
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Retry policy for read-modify-write transactions.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause before each retry, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_retry_delay_ms() -> u64 {
    200
}

impl PersistenceConfig {
    /// Retry delay as a [`Duration`].
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Which compute gateway implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayType {
    /// REST client against the compute API.
    #[default]
    Rest,

    /// In-memory gateway for testing.
    Mock,
}

/// Remote compute API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ComputeConfig {
    /// Gateway implementation.
    #[serde(default)]
    pub gateway_type: GatewayType,

    /// Base URL of the compute API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Project that owns demo instances.
    #[serde(default = "default_project_id")]
    pub project_id: String,

    /// Zone demo instances are created in.
    #[serde(default = "default_zone")]
    pub zone: String,

    /// Machine type for demo instances.
    #[serde(default = "default_machine_type")]
    pub machine_type: String,

    /// Project hosting the boot image.
    #[serde(default = "default_image_project")]
    pub image_project: String,

    /// Boot image name.
    #[serde(default = "default_image")]
    pub image: String,

    /// Network tags applied to demo instances.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Service account scopes granted in addition to the compute scope.
    #[serde(default)]
    pub extra_scopes: Vec<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_compute_timeout_secs")]
    pub timeout_secs: u64,

    /// Bearer token for the compute API.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub access_token: Option<SecretString>,

    /// Environment variable consulted when `access_token` is unset.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
}

fn default_api_url() -> String {
    "https://www.googleapis.com/compute/v1".to_owned()
}

fn default_project_id() -> String {
    "cloud-app-demo-tool".to_owned()
}

fn default_zone() -> String {
    "us-central1-a".to_owned()
}

fn default_machine_type() -> String {
    "n1-standard-2".to_owned()
}

fn default_image_project() -> String {
    "ubuntu-os-cloud".to_owned()
}

fn default_image() -> String {
    "ubuntu-14-10".to_owned()
}

const fn default_compute_timeout_secs() -> u64 {
    30
}

fn default_access_token_env() -> String {
    "GOOGLE_OAUTH_ACCESS_TOKEN".to_owned()
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.map(SecretString::from))
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            gateway_type: GatewayType::default(),
            api_url: default_api_url(),
            project_id: default_project_id(),
            zone: default_zone(),
            machine_type: default_machine_type(),
            image_project: default_image_project(),
            image: default_image(),
            tags: Vec::new(),
            extra_scopes: Vec::new(),
            timeout_secs: default_compute_timeout_secs(),
            access_token: None,
            access_token_env: default_access_token_env(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DemokitConfig::default();
        assert_eq!(config.datastore.backend, DatastoreBackend::Memory);
        assert_eq!(config.persistence.max_retries, 5);
        assert_eq!(config.persistence.retry_delay(), Duration::from_millis(200));
        assert_eq!(config.compute.project_id, "cloud-app-demo-tool");
        assert_eq!(config.compute.zone, "us-central1-a");
        assert_eq!(config.compute.machine_type, "n1-standard-2");
        assert!(config.compute.access_token.is_none());
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [datastore]
            backend = "postgres"
            url = "postgres://user:pass@db:5432/demos"

            [persistence]
            max_retries = 2
            retry_delay_ms = 10

            [compute]
            gateway_type = "mock"
            zone = "europe-west1-b"
            tags = ["http-server"]
            access_token = "s3cret"
        "#;

        let config: DemokitConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.datastore.backend, DatastoreBackend::Postgres);
        assert_eq!(config.datastore.url, "postgres://user:pass@db:5432/demos");
        assert_eq!(config.datastore.max_connections, 10);
        assert_eq!(config.persistence.max_retries, 2);
        assert_eq!(config.persistence.retry_delay_ms, 10);
        assert_eq!(config.compute.gateway_type, GatewayType::Mock);
        assert_eq!(config.compute.zone, "europe-west1-b");
        assert_eq!(config.compute.machine_type, "n1-standard-2");
        assert_eq!(
            config.compute.access_token.as_ref().map(|t| t.expose_secret().to_owned()),
            Some("s3cret".to_owned())
        );
    }

    #[test]
    fn access_token_is_redacted_in_debug_output() {
        let config: ComputeConfig = toml::from_str(r#"access_token = "s3cret""#).unwrap();
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[persistence]\nmax_retries = 7").unwrap();

        let config = DemokitConfig::from_file(file.path()).unwrap();
        assert_eq!(config.persistence.max_retries, 7);
        assert_eq!(config.persistence.retry_delay_ms, 200);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DemokitConfig::from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.compute.api_url, "https://www.googleapis.com/compute/v1");
    }
}
