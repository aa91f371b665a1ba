//! Deployment templates and the manager that carries them out.

mod manager;
mod template;

pub use manager::{DeploymentManager, Observation, INSTANCE_DETAIL_URL_KEY, SSH_URL_KEY};
pub use template::{
    DeploymentTemplate, DeploymentType, SingleInstanceDeployment, INSTANCE_TEMPLATE_PROPERTY,
    TYPE_PROPERTY,
};
