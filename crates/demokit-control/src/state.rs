//! Typestate pattern for the demo lifecycle.
//!
//! A demo only moves forward:
//!
//! ```text
//! Created ──▶ Launched ──▶ Deleting
//!    │                        ▲
//!    └────────────────────────┘
//! ```
//!
//! `launch` exists only on [`Lifecycle<Created>`], so launching a demo that is
//! already launched or being deleted does not compile. Teardown is available
//! from every state and is idempotent once `Deleting` is reached. Demos loaded
//! from the store come back as [`AnyDemo`] and are narrowed with a `match`.

use std::marker::PhantomData;

use crate::error::{ControlError, ControlResult};
use crate::types::{Demo, DemoId, DemoStatus, Username};

/// Marker trait for demo states.
pub trait DemoState: private::Sealed + Send + Sync {
    /// Persisted status for this state.
    fn status() -> DemoStatus;
}

mod private {
    pub trait Sealed {}
}

/// Record allocated, nothing provisioned.
#[derive(Debug, Clone, Copy)]
pub struct Created;

/// Remote resources requested.
#[derive(Debug, Clone, Copy)]
pub struct Launched;

/// Teardown requested. Terminal.
#[derive(Debug, Clone, Copy)]
pub struct Deleting;

impl private::Sealed for Created {}
impl private::Sealed for Launched {}
impl private::Sealed for Deleting {}

impl DemoState for Created {
    fn status() -> DemoStatus {
        DemoStatus::Created
    }
}

impl DemoState for Launched {
    fn status() -> DemoStatus {
        DemoStatus::Launched
    }
}

impl DemoState for Deleting {
    fn status() -> DemoStatus {
        DemoStatus::Deleting
    }
}

/// A user's demo in a known state.
#[derive(Debug)]
pub struct Lifecycle<S: DemoState> {
    owner: Username,
    demo: Demo,
    _state: PhantomData<S>,
}

impl<S: DemoState> Lifecycle<S> {
    /// Owning user.
    #[must_use]
    pub const fn owner(&self) -> &Username {
        &self.owner
    }

    /// The demo record.
    #[must_use]
    pub const fn demo(&self) -> &Demo {
        &self.demo
    }

    /// Demo identifier.
    #[must_use]
    pub const fn id(&self) -> DemoId {
        self.demo.id
    }

    /// Status this state persists as.
    #[must_use]
    pub fn status(&self) -> DemoStatus {
        S::status()
    }

    /// Consume the lifecycle, returning the record.
    #[must_use]
    pub fn into_demo(self) -> Demo {
        self.demo
    }

    /// Request teardown. Allowed from every state.
    #[must_use]
    pub fn teardown(self) -> Lifecycle<Deleting> {
        self.transition()
    }

    fn transition<T: DemoState>(mut self) -> Lifecycle<T> {
        self.demo.status = T::status();
        Lifecycle {
            owner: self.owner,
            demo: self.demo,
            _state: PhantomData,
        }
    }
}

impl Lifecycle<Created> {
    /// Mark the demo launched.
    #[must_use]
    pub fn launch(self) -> Lifecycle<Launched> {
        self.transition()
    }
}

/// A demo whose state is only known at run time.
#[derive(Debug)]
pub enum AnyDemo {
    /// Demo in the created state.
    Created(Lifecycle<Created>),
    /// Demo in the launched state.
    Launched(Lifecycle<Launched>),
    /// Demo being deleted.
    Deleting(Lifecycle<Deleting>),
}

impl AnyDemo {
    /// Wrap a stored demo according to its status.
    #[must_use]
    pub fn from_persisted(owner: Username, demo: Demo) -> Self {
        match demo.status {
            DemoStatus::Created => Self::Created(Lifecycle {
                owner,
                demo,
                _state: PhantomData,
            }),
            DemoStatus::Launched => Self::Launched(Lifecycle {
                owner,
                demo,
                _state: PhantomData,
            }),
            DemoStatus::Deleting => Self::Deleting(Lifecycle {
                owner,
                demo,
                _state: PhantomData,
            }),
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> DemoStatus {
        match self {
            Self::Created(_) => DemoStatus::Created,
            Self::Launched(_) => DemoStatus::Launched,
            Self::Deleting(_) => DemoStatus::Deleting,
        }
    }

    /// Whether reads refresh this demo from remote state.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Created(_) | Self::Launched(_))
    }

    /// Consume, returning the record.
    #[must_use]
    pub fn into_demo(self) -> Demo {
        match self {
            Self::Created(d) => d.into_demo(),
            Self::Launched(d) => d.into_demo(),
            Self::Deleting(d) => d.into_demo(),
        }
    }

    /// Request teardown from whatever state the demo is in.
    #[must_use]
    pub fn teardown(self) -> Lifecycle<Deleting> {
        match self {
            Self::Created(d) => d.teardown(),
            Self::Launched(d) => d.teardown(),
            Self::Deleting(d) => d,
        }
    }

    /// Try to extract a created demo.
    ///
    /// A deleting demo yields [`ControlError::AlreadyDeleting`].
    pub fn try_into_created(self) -> ControlResult<Lifecycle<Created>> {
        match self {
            Self::Created(d) => Ok(d),
            Self::Deleting(d) => Err(ControlError::AlreadyDeleting {
                user: d.owner().to_string(),
                demo_id: d.id(),
            }),
            Self::Launched(d) => Err(ControlError::invalid_state(format!(
                "demo {} is {}, expected {}",
                d.id(),
                DemoStatus::Launched,
                DemoStatus::Created
            ))),
        }
    }
}
