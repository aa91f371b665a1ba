//! Core types for demokit-control.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deployment::DeploymentTemplate;
use crate::error::{ControlError, ControlResult};

/// Stable per-user identifier supplied by the identity layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Create a username, rejecting empty identities.
    pub fn new(name: impl Into<String>) -> ControlResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ControlError::invalid_argument("username must not be empty"));
        }
        Ok(Self(name))
    }

    /// Derive a username from an authenticated nickname by dropping any
    /// `@domain` suffix.
    pub fn from_nickname(nickname: &str) -> ControlResult<Self> {
        match nickname.find('@') {
            Some(at) if at > 0 => Self::new(&nickname[..at]),
            _ => Self::new(nickname),
        }
    }

    /// Get the username as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resource name for the given reserved suffix: `<username>-<suffix>`.
    #[must_use]
    pub fn resource_name(&self, suffix: u64) -> String {
        format!("{}-{suffix}", self.0)
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Store-assigned demo identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DemoId(i64);

impl DemoId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for DemoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Demo lifecycle status.
///
/// Transitions only move forward: `Created -> Launched -> Deleting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DemoStatus {
    /// Record allocated, nothing provisioned yet.
    Created,
    /// Remote resources have been requested.
    Launched,
    /// Teardown requested. Terminal.
    Deleting,
}

/// Label written by an earlier schema revision; read back as [`DemoStatus::Created`].
pub const LEGACY_ACTIVE_LABEL: &str = "ACTIVE";

impl DemoStatus {
    /// Stored label for this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Launched => "LAUNCHED",
            Self::Deleting => "DELETING",
        }
    }

    /// Every stored label that decodes to this status, current label first.
    #[must_use]
    pub const fn stored_labels(&self) -> &'static [&'static str] {
        match self {
            Self::Created => &["CREATED", LEGACY_ACTIVE_LABEL],
            Self::Launched => &["LAUNCHED"],
            Self::Deleting => &["DELETING"],
        }
    }

    /// Statuses whose demos count as active and are refreshed on read.
    pub const ACTIVE: [Self; 2] = [Self::Created, Self::Launched];

    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleting)
    }
}

impl fmt::Display for DemoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DemoStatus {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" | LEGACY_ACTIVE_LABEL => Ok(Self::Created),
            "LAUNCHED" => Ok(Self::Launched),
            "DELETING" => Ok(Self::Deleting),
            _ => Err(ControlError::invalid_state(format!(
                "unknown demo status: {s}"
            ))),
        }
    }
}

/// A remote resource recorded against a demo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resourceType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resource {
    /// A compute instance reserved for the demo.
    #[serde(rename_all = "camelCase")]
    ComputeInstance {
        /// Instance name, `<username>-<suffix>`.
        name: String,
        /// When the name was reserved.
        creation_time: DateTime<Utc>,
        /// Zone the instance lives in.
        zone: String,
    },
}

impl Resource {
    /// Resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::ComputeInstance { name, .. } => name,
        }
    }
}

/// Request to create a demo. Fields assigned by the store are absent.
#[derive(Debug, Clone)]
pub struct NewDemo {
    /// Free-text description; a default is generated when empty.
    pub description: Option<String>,
    /// What the demo will provision.
    pub deployment_template: DeploymentTemplate,
}

/// A demo record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Demo {
    /// Store-assigned identifier.
    pub id: DemoId,
    /// Lifecycle status.
    pub status: DemoStatus,
    /// Free-text description.
    pub description: String,
    /// Set once at creation; listings sort on it, newest first.
    pub creation_time: DateTime<Utc>,
    /// What the demo provisions. Owned exclusively by this record.
    pub deployment_template: DeploymentTemplate,
    /// Resources reserved for the demo.
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Remote status, refreshed on read. Never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_status: Option<String>,
    /// Remote metadata, refreshed on read. Never persisted.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deployment_metadata: BTreeMap<String, String>,
}

/// Per-user counter backing resource name reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCounter {
    /// Owning user.
    pub username: Username,
    /// Next unreserved suffix.
    pub current_suffix: u64,
}

impl UserCounter {
    /// Counter for a user with no reservations yet.
    #[must_use]
    pub const fn new(username: Username) -> Self {
        Self {
            username,
            current_suffix: 0,
        }
    }

    /// Reserve `count` contiguous suffixes, returning the first.
    pub fn reserve(&mut self, count: u64) -> ControlResult<u64> {
        let first = self.current_suffix;
        self.current_suffix = first.checked_add(count).ok_or_else(|| {
            ControlError::internal(format!(
                "name suffix overflow for user {}",
                self.username
            ))
        })?;
        Ok(first)
    }
}
