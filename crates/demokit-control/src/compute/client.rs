//! HTTP client for the compute REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::config::ComputeConfig;
use crate::error::{ControlError, ControlResult};

use super::{ComputeGateway, InstanceSpec};

/// REST client for creating, deleting and inspecting compute instances.
#[derive(Clone)]
pub struct ComputeClient {
    client: Client,
    base_url: String,
    project_id: String,
    token: Option<SecretString>,
}

impl ComputeClient {
    /// Create a new compute client from configuration.
    ///
    /// The bearer token comes from `access_token`, or failing that from the
    /// environment variable named by `access_token_env`. It is resolved once,
    /// here.
    pub fn new(config: &ComputeConfig) -> ControlResult<Self> {
        let token = config.access_token.clone().or_else(|| {
            std::env::var(&config.access_token_env)
                .ok()
                .filter(|value| !value.is_empty())
                .map(SecretString::from)
        });
        if token.is_none() {
            warn!(
                env = %config.access_token_env,
                "no compute access token configured, requests will be unauthenticated"
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_owned(),
            project_id: config.project_id.clone(),
            token,
        })
    }

    /// Create a client against a custom base URL without credentials.
    pub fn with_url(url: impl Into<String>, project_id: impl Into<String>) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: url.into().trim_end_matches('/').to_owned(),
            project_id: project_id.into(),
            token: None,
        })
    }

    /// Attach a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    fn instances_url(&self, zone: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/instances",
            self.base_url, self.project_id, zone
        )
    }

    fn instance_url(&self, spec: &InstanceSpec) -> String {
        format!("{}/{}", self.instances_url(&spec.zone), spec.name)
    }

    fn authorise(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn failure(action: &str, spec: &InstanceSpec, response: Response) -> ControlError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        ControlError::gateway(format!(
            "failed to {action} instance {} in {}: {status} {body}",
            spec.name, spec.zone
        ))
    }
}

/// Last path segment of a zone, which the API reports as a full URL.
fn short_zone(zone: &str) -> &str {
    zone.rsplit('/').next().unwrap_or(zone)
}

#[async_trait]
impl ComputeGateway for ComputeClient {
    async fn create_instance(&self, spec: &InstanceSpec) -> ControlResult<()> {
        let url = self.instances_url(&spec.zone);
        debug!(instance = %spec.name, zone = %spec.zone, "creating instance");

        let response = self
            .authorise(self.client.post(&url).json(spec))
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(Self::failure("create", spec, response).await);
        }
        Ok(())
    }

    async fn delete_instance(&self, spec: &InstanceSpec) -> ControlResult<()> {
        let url = self.instance_url(spec);
        debug!(instance = %spec.name, zone = %spec.zone, "deleting instance");

        let response = self
            .authorise(self.client.delete(&url))
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(Self::failure("delete", spec, response).await);
        }
        Ok(())
    }

    async fn get_instance(&self, spec: &InstanceSpec) -> ControlResult<Option<InstanceSpec>> {
        let url = self.instance_url(spec);
        let response = self
            .authorise(self.client.get(&url))
            .send()
            .await
            .map_err(ControlError::Http)?;

        match response.status() {
            StatusCode::OK => {
                let mut instance: InstanceSpec =
                    response.json().await.map_err(ControlError::Http)?;
                instance.zone = short_zone(&instance.zone).to_owned();
                Ok(Some(instance))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::failure("fetch", spec, response).await),
        }
    }
}

impl std::fmt::Debug for ComputeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeClient")
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_urls_are_shortened() {
        assert_eq!(
            short_zone("https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a"),
            "us-central1-a"
        );
        assert_eq!(short_zone("europe-west1-b"), "europe-west1-b");
    }

    #[test]
    fn instance_urls_include_project_and_zone() {
        let client = ComputeClient::with_url("http://localhost:9000/", "demo-project")
            .unwrap_or_else(|e| panic!("client: {e}"));
        let spec = InstanceSpec::with_defaults("alice-0", &ComputeConfig::default());
        assert_eq!(
            client.instance_url(&spec),
            "http://localhost:9000/projects/demo-project/zones/us-central1-a/instances/alice-0"
        );
    }

    #[test]
    fn debug_output_hides_the_token() {
        let client = ComputeClient::with_url("http://localhost:9000", "p")
            .unwrap_or_else(|e| panic!("client: {e}"))
            .with_token(SecretString::from("hunter2".to_owned()));
        let debug = format!("{client:?}");
        assert!(debug.contains("authenticated: true"));
        assert!(!debug.contains("hunter2"));
    }
}
