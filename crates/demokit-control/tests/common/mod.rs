//! Common test utilities for demokit-control integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use demokit_control::config::ComputeConfig;
use demokit_control::{DemoRepository, DemoService, MockGateway, RetryPolicy, Username};
use demokit_datastore::MemoryDatastore;

/// A demo service wired to an in-memory store and a mock gateway.
pub struct TestDemokit {
    pub store: MemoryDatastore,
    pub gateway: Arc<MockGateway>,
    pub service: Arc<DemoService>,
}

impl TestDemokit {
    /// Default retry bound with a short delay.
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy {
            max_retries: 5,
            delay: Duration::from_millis(2),
        })
    }

    /// Custom retry policy.
    pub fn with_policy(policy: RetryPolicy) -> Self {
        let store = MemoryDatastore::new();
        let gateway = Arc::new(MockGateway::new());
        let repository = DemoRepository::new(Arc::new(store.clone()), policy);
        let service = Arc::new(DemoService::new(
            repository,
            gateway.clone(),
            ComputeConfig::default(),
        ));
        Self {
            store,
            gateway,
            service,
        }
    }

    pub fn repository(&self) -> &DemoRepository {
        self.service.repository()
    }
}

pub fn user(name: &str) -> Username {
    Username::new(name).expect("valid username")
}
