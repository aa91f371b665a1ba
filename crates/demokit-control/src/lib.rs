//! Demokit control plane.
//!
//! Manages the lifecycle of demos: user-owned records that are created,
//! launched onto a remote compute instance, and torn down.
//!
//! # Architecture
//!
//! - **Persistence** ([`persistence`]): demo CRUD and per-user name
//!   reservation over a [`demokit_datastore::Datastore`]. Every
//!   read-modify-write runs in an optimistic transaction that is retried a
//!   bounded number of times on conflict.
//! - **Deployment** ([`deployment`]): templates describing what a demo
//!   provisions, and the manager that launches, tears down and reconciles
//!   them through a [`compute::ComputeGateway`].
//! - **Lifecycle** ([`lifecycle`]): the operations callers use, enforcing the
//!   state machine below.
//!
//! # State Machine
//!
//! ```text
//! Created ──▶ Launched ──▶ Deleting
//!    │                        ▲
//!    └────────────────────────┘
//! ```
//!
//! Launching a launched demo is a no-op; launching a deleting demo fails.
//! Teardown is allowed from every state and may be repeated.
//!
//! # Example
//!
//! ```ignore
//! use demokit_control::{DemoService, DemokitConfig, Username};
//!
//! let service = DemoService::from_config(&DemokitConfig::load()?).await?;
//! let user = Username::from_nickname("alice@example.com")?;
//!
//! let demo = service.create_demo(&user, None).await?;
//! service.launch_demo(&user, demo.id).await?;
//! service.teardown_demo(&user, demo.id).await?;
//! ```

#![forbid(unsafe_code)]

pub mod codec;
pub mod compute;
pub mod config;
pub mod deployment;
pub mod error;
pub mod lifecycle;
pub mod persistence;
pub mod state;
pub mod types;

// Re-export commonly used types at the crate root
pub use compute::{ComputeClient, ComputeGateway, InstanceSpec, MockGateway};
pub use config::DemokitConfig;
pub use deployment::{DeploymentManager, DeploymentTemplate, SingleInstanceDeployment};
pub use error::{ControlError, ControlResult};
pub use lifecycle::DemoService;
pub use persistence::{DemoRepository, RetryPolicy};
pub use state::{AnyDemo, Created, Deleting, DemoState, Launched, Lifecycle};
pub use types::{Demo, DemoId, DemoStatus, NewDemo, Resource, UserCounter, Username};
