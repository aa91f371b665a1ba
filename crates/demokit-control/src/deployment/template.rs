//! Deployment templates.
//!
//! A template is stored on its demo as an embedded entity whose first
//! property is the `type` tag. Readers dispatch on the tag before touching
//! the rest of the payload, so a new variant only needs a new tag and its own
//! payload layout.

use demokit_datastore::{EmbeddedEntity, PropertyMap, Value};
use serde::{Deserialize, Serialize};

use crate::compute::InstanceSpec;
use crate::error::{ControlError, ControlResult};

use super::manager::{DeploymentManager, Observation};

/// Tag property of an embedded template.
pub const TYPE_PROPERTY: &str = "type";

/// Payload property of a single-instance template.
pub const INSTANCE_TEMPLATE_PROPERTY: &str = "instanceTemplate";

/// Discriminator for [`DeploymentTemplate`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeploymentType {
    /// One compute instance.
    SingleInstance,
}

impl DeploymentType {
    /// Stored tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SingleInstance => "SINGLE_INSTANCE",
        }
    }
}

impl std::fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeploymentType {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SINGLE_INSTANCE" => Ok(Self::SingleInstance),
            other => Err(ControlError::UnsupportedTemplate(other.to_owned())),
        }
    }
}

/// A deployment that provisions exactly one compute instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleInstanceDeployment {
    /// Specification sent to the compute API on launch.
    pub instance_template: InstanceSpec,
}

impl SingleInstanceDeployment {
    /// Wrap an instance specification.
    #[must_use]
    pub const fn new(instance_template: InstanceSpec) -> Self {
        Self { instance_template }
    }
}

/// What a demo provisions when launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentTemplate {
    /// One compute instance.
    SingleInstance(SingleInstanceDeployment),
}

impl DeploymentTemplate {
    /// Template for a single instance.
    #[must_use]
    pub const fn single_instance(spec: InstanceSpec) -> Self {
        Self::SingleInstance(SingleInstanceDeployment::new(spec))
    }

    /// Variant tag.
    #[must_use]
    pub const fn deployment_type(&self) -> DeploymentType {
        match self {
            Self::SingleInstance(_) => DeploymentType::SingleInstance,
        }
    }

    /// Encode as an embedded entity, tag first.
    pub fn to_embedded(&self) -> ControlResult<EmbeddedEntity> {
        let embedded = PropertyMap::new().with(TYPE_PROPERTY, self.deployment_type().as_str());
        match self {
            Self::SingleInstance(deployment) => {
                let payload = serde_json::to_string(&deployment.instance_template)?;
                Ok(embedded.with(INSTANCE_TEMPLATE_PROPERTY, Value::Text(payload)))
            }
        }
    }

    /// Decode from an embedded entity.
    ///
    /// Fails with [`ControlError::UnsupportedTemplate`] for an unknown tag.
    pub fn from_embedded(embedded: &EmbeddedEntity) -> ControlResult<Self> {
        let tag: DeploymentType = embedded.get_str(TYPE_PROPERTY)?.parse()?;
        match tag {
            DeploymentType::SingleInstance => {
                let payload = embedded.get_str(INSTANCE_TEMPLATE_PROPERTY)?;
                let spec: InstanceSpec = serde_json::from_str(payload)?;
                Ok(Self::single_instance(spec))
            }
        }
    }

    /// Provision the template's resources.
    pub async fn launch(&self, manager: &DeploymentManager) -> ControlResult<()> {
        match self {
            Self::SingleInstance(deployment) => manager.launch_single_instance(deployment).await,
        }
    }

    /// Release the template's resources.
    pub async fn teardown(&self, manager: &DeploymentManager) -> ControlResult<()> {
        match self {
            Self::SingleInstance(deployment) => manager.teardown_single_instance(deployment).await,
        }
    }

    /// Observe the template's resources. `None` when nothing exists remotely.
    pub async fn reconcile(&self, manager: &DeploymentManager) -> ControlResult<Option<Observation>> {
        match self {
            Self::SingleInstance(deployment) => manager.observe_single_instance(deployment).await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::ComputeConfig;

    fn template() -> DeploymentTemplate {
        DeploymentTemplate::single_instance(InstanceSpec::with_defaults(
            "alice-0",
            &ComputeConfig::default(),
        ))
    }

    #[test]
    fn embedded_form_reproduces_the_template() {
        let original = template();
        let embedded = original.to_embedded().unwrap();

        assert_eq!(embedded.iter().next().map(|(name, _)| name), Some(TYPE_PROPERTY));
        assert_eq!(embedded.get_str(TYPE_PROPERTY).unwrap(), "SINGLE_INSTANCE");
        assert!(matches!(
            embedded.get(INSTANCE_TEMPLATE_PROPERTY),
            Some(Value::Text(_))
        ));

        let decoded = DeploymentTemplate::from_embedded(&embedded).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.deployment_type(), DeploymentType::SingleInstance);
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let embedded = PropertyMap::new()
            .with(TYPE_PROPERTY, "MULTI_INSTANCE")
            .with(INSTANCE_TEMPLATE_PROPERTY, Value::Text("{}".to_owned()));

        assert!(matches!(
            DeploymentTemplate::from_embedded(&embedded),
            Err(ControlError::UnsupportedTemplate(tag)) if tag == "MULTI_INSTANCE"
        ));
    }

    #[test]
    fn missing_payload_is_a_store_error() {
        let embedded = PropertyMap::new().with(TYPE_PROPERTY, "SINGLE_INSTANCE");
        assert!(matches!(
            DeploymentTemplate::from_embedded(&embedded),
            Err(ControlError::Store(_))
        ));
    }

    #[test]
    fn json_form_is_tagged() {
        let json = serde_json::to_value(template()).unwrap();
        assert_eq!(json["type"], "SINGLE_INSTANCE");
        assert_eq!(json["instanceTemplate"]["name"], "alice-0");
    }
}
