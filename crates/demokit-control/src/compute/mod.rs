//! Remote compute gateway.
//!
//! The deployment manager talks to remote compute through the narrow
//! [`ComputeGateway`] trait. [`ComputeClient`] implements it over the REST
//! API; [`MockGateway`] keeps instances in memory for tests.

mod client;
mod instance;

pub use client::ComputeClient;
pub use instance::{
    instance_detail_url, ssh_url, AccessConfig, AttachedDisk, DiskInitializeParams,
    InstanceSpec, NetworkInterface, Scheduling, ServiceAccount, Tags, COMPUTE_SCOPE,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::config::ComputeConfig;
use crate::error::{ControlError, ControlResult};

/// Operations the deployment manager needs from remote compute.
#[async_trait]
pub trait ComputeGateway: Send + Sync {
    /// Request creation of an instance. Not idempotent.
    async fn create_instance(&self, spec: &InstanceSpec) -> ControlResult<()>;

    /// Request deletion of an instance.
    async fn delete_instance(&self, spec: &InstanceSpec) -> ControlResult<()>;

    /// Look up the live instance matching `spec` by name and zone.
    ///
    /// Returns `Ok(None)` when the instance does not exist; any other failure
    /// is an error.
    async fn get_instance(&self, spec: &InstanceSpec) -> ControlResult<Option<InstanceSpec>>;
}

/// Create a gateway from configuration.
pub fn create_gateway(config: &ComputeConfig) -> ControlResult<Arc<dyn ComputeGateway>> {
    use crate::config::GatewayType;

    match config.gateway_type {
        GatewayType::Rest => {
            let client = ComputeClient::new(config)?;
            Ok(Arc::new(client))
        }
        GatewayType::Mock => Ok(Arc::new(MockGateway::default())),
    }
}

/// Mock gateway for testing.
///
/// Created instances report status `RUNNING`. Call counters let tests assert
/// how often the remote side was touched.
#[derive(Debug, Default)]
pub struct MockGateway {
    instances: RwLock<HashMap<(String, String), InstanceSpec>>,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    get_calls: AtomicUsize,
    unavailable: AtomicBool,
}

/// Status reported for instances created through [`MockGateway`].
pub const MOCK_RUNNING_STATUS: &str = "RUNNING";

fn instance_key(spec: &InstanceSpec) -> (String, String) {
    (spec.zone.clone(), spec.name.clone())
}

impl MockGateway {
    /// Create an empty mock gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a gateway error, or stop doing so.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Drop an instance without counting a delete, as if removed out of band.
    pub fn forget(&self, spec: &InstanceSpec) -> ControlResult<()> {
        self.instances
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?
            .remove(&instance_key(spec));
        Ok(())
    }

    /// Whether an instance with this name and zone exists.
    pub fn contains(&self, spec: &InstanceSpec) -> ControlResult<bool> {
        Ok(self
            .instances
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?
            .contains_key(&instance_key(spec)))
    }

    /// Number of create calls received.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of delete calls received.
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Number of get calls received.
    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> ControlResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ControlError::gateway("compute API unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ComputeGateway for MockGateway {
    async fn create_instance(&self, spec: &InstanceSpec) -> ControlResult<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut instances = self
            .instances
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        let key = instance_key(spec);
        if instances.contains_key(&key) {
            return Err(ControlError::gateway(format!(
                "instance {} already exists in {}",
                spec.name, spec.zone
            )));
        }

        let mut created = spec.clone();
        created.status = Some(MOCK_RUNNING_STATUS.to_owned());
        instances.insert(key, created);
        Ok(())
    }

    async fn delete_instance(&self, spec: &InstanceSpec) -> ControlResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut instances = self
            .instances
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        match instances.remove(&instance_key(spec)) {
            Some(_) => Ok(()),
            None => Err(ControlError::gateway(format!(
                "instance {} not found in {}",
                spec.name, spec.zone
            ))),
        }
    }

    async fn get_instance(&self, spec: &InstanceSpec) -> ControlResult<Option<InstanceSpec>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let instances = self
            .instances
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(instances.get(&instance_key(spec)).cloned())
    }
}
