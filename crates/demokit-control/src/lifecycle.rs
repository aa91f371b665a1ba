//! Demo lifecycle operations.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::compute::{create_gateway, ComputeGateway, InstanceSpec};
use crate::config::{ComputeConfig, DemokitConfig};
use crate::deployment::{DeploymentManager, DeploymentTemplate};
use crate::error::{ControlError, ControlResult};
use crate::persistence::{open_datastore, DemoRepository, RetryPolicy};
use crate::state::AnyDemo;
use crate::types::{Demo, DemoId, NewDemo, Resource, Username};

/// Entry point for every demo lifecycle operation.
///
/// Holds no per-request state; all coordination between concurrent callers
/// happens in the store.
pub struct DemoService {
    repository: DemoRepository,
    manager: DeploymentManager,
    compute: ComputeConfig,
}

impl DemoService {
    /// Create a new demo service.
    pub fn new(
        repository: DemoRepository,
        gateway: Arc<dyn ComputeGateway>,
        compute: ComputeConfig,
    ) -> Self {
        let manager = DeploymentManager::new(gateway, compute.project_id.clone());
        Self {
            repository,
            manager,
            compute,
        }
    }

    /// Build the service from configuration, opening the store and gateway.
    pub async fn from_config(config: &DemokitConfig) -> ControlResult<Self> {
        let store = open_datastore(&config.datastore).await?;
        let gateway = create_gateway(&config.compute)?;
        let repository = DemoRepository::new(store, RetryPolicy::from_config(&config.persistence));
        Ok(Self::new(repository, gateway, config.compute.clone()))
    }

    /// Underlying repository.
    #[must_use]
    pub const fn repository(&self) -> &DemoRepository {
        &self.repository
    }

    /// Create a demo with a freshly named single-instance template.
    pub async fn create_demo(
        &self,
        user: &Username,
        description: Option<String>,
    ) -> ControlResult<Demo> {
        let suffix = self.repository.reserve_names(user, 1).await?;
        let spec = InstanceSpec::with_defaults(user.resource_name(suffix), &self.compute);

        self.repository
            .create_demo(
                user,
                NewDemo {
                    description,
                    deployment_template: DeploymentTemplate::single_instance(spec),
                },
            )
            .await
    }

    /// Fetch a demo, refreshing remote state unless it is being deleted.
    ///
    /// A failed remote lookup fails the whole read; no partially refreshed
    /// record is returned.
    pub async fn get_demo(&self, user: &Username, id: DemoId) -> ControlResult<Demo> {
        let current = self.load(user, id).await?;
        if !current.is_active() {
            debug!(user = %user, demo_id = %id, status = %current.status(), "not reconciling");
            return Ok(current.into_demo());
        }

        let mut demo = current.into_demo();
        self.manager.reconcile(&mut demo).await?;
        Ok(demo)
    }

    /// A user's active demos, newest first, each refreshed from remote state.
    pub async fn list_active_demos(&self, user: &Username) -> ControlResult<Vec<Demo>> {
        let mut demos = self.repository.list_active(user).await?;
        for demo in &mut demos {
            self.manager.reconcile(demo).await?;
        }
        Ok(demos)
    }

    /// Launch a demo.
    ///
    /// A created demo is provisioned and marked launched. Launching again is
    /// a no-op. A demo being deleted cannot be launched. If the status write
    /// fails after provisioning, the demo stays created and a repeated launch
    /// adopts the existing remote resources.
    pub async fn launch_demo(&self, user: &Username, id: DemoId) -> ControlResult<Demo> {
        let created = match self.load(user, id).await? {
            AnyDemo::Launched(launched) => {
                info!(user = %user, demo_id = %id, "demo already launched");
                return Ok(launched.into_demo());
            }
            other => other.try_into_created()?,
        };

        info!(user = %user, demo_id = %id, "launching demo");
        if let Err(err) = self.manager.launch(&created.demo().deployment_template).await {
            error!(user = %user, demo_id = %id, error = %err, "launch failed");
            return Err(err);
        }

        let launched = created.launch();
        self.repository
            .advance_status(user, id, launched.status())
            .await
    }

    /// Tear a demo down and mark it deleting. Safe to repeat.
    pub async fn teardown_demo(&self, user: &Username, id: DemoId) -> ControlResult<Demo> {
        let current = self.load(user, id).await?;
        info!(user = %user, demo_id = %id, from = %current.status(), "tearing down demo");

        let deleting = current.teardown();
        self.manager
            .teardown(&deleting.demo().deployment_template)
            .await?;

        self.repository
            .advance_status(user, id, deleting.status())
            .await
    }

    /// Remove a demo record without touching remote resources.
    pub async fn delete_demo(&self, user: &Username, id: DemoId) -> ControlResult<()> {
        warn!(user = %user, demo_id = %id, "deleting demo record");
        self.repository.delete_demo(user, id).await
    }

    /// Reserve `count` instance names and record them on a demo.
    ///
    /// The reservation and the save are separate transactions. A failure in
    /// between leaves unused names behind, which is harmless: names only need
    /// to be unique, not dense.
    pub async fn create_instances(
        &self,
        user: &Username,
        id: DemoId,
        count: u64,
    ) -> ControlResult<Vec<Resource>> {
        if count == 0 {
            return Err(ControlError::invalid_argument(
                "instance count must be positive",
            ));
        }

        let first = self.repository.reserve_names(user, count).await?;
        let creation_time = Utc::now();
        let resources = (first..first.saturating_add(count))
            .map(|suffix| Resource::ComputeInstance {
                name: user.resource_name(suffix),
                creation_time,
                zone: self.compute.zone.clone(),
            })
            .collect::<Vec<_>>();

        self.repository.save_resources(user, id, &resources).await?;
        info!(user = %user, demo_id = %id, count, first, "instances recorded");
        Ok(resources)
    }

    async fn load(&self, user: &Username, id: DemoId) -> ControlResult<AnyDemo> {
        let demo = self
            .repository
            .get_demo(user, id)
            .await?
            .ok_or_else(|| ControlError::NotFound {
                user: user.to_string(),
                demo_id: id,
            })?;
        Ok(AnyDemo::from_persisted(user.clone(), demo))
    }
}

impl std::fmt::Debug for DemoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemoService")
            .field("repository", &self.repository)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}
