//! Error types for demokit-control.

use demokit_datastore::StoreError;

use crate::types::DemoId;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur while managing demos.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The demo does not exist for this user.
    #[error("demo {demo_id} not found for user {user}")]
    NotFound {
        /// Owning user.
        user: String,
        /// Requested demo.
        demo_id: DemoId,
    },

    /// A request argument was rejected before touching the store.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The demo is already being torn down and cannot be launched.
    #[error("demo {demo_id} for user {user} is already deleted or deleting")]
    AlreadyDeleting {
        /// Owning user.
        user: String,
        /// Target demo.
        demo_id: DemoId,
    },

    /// A transaction kept conflicting until the retry bound was hit.
    #[error("abandoning {operation} for {target} after {attempts} unsuccessful attempts")]
    RetriesExhausted {
        /// Persistence operation name.
        operation: &'static str,
        /// What the operation was acting on.
        target: String,
        /// Total attempts made.
        attempts: u32,
    },

    /// A stored status value or transition is outside the known set.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A deployment template tag with no registered variant.
    #[error("unsupported deployment template: {0}")]
    UnsupportedTemplate(String),

    /// The remote compute API rejected a request.
    #[error("compute gateway error: {0}")]
    Gateway(String),

    /// HTTP transport error talking to the compute API.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Document store error.
    #[error("datastore error: {0}")]
    Store(#[from] StoreError),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal consistency violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an invalid-state error.
    #[must_use]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a gateway error.
    #[must_use]
    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::Gateway(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is a transaction conflict that a fresh attempt of
    /// the same block may resolve.
    #[must_use]
    pub const fn is_transaction_conflict(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_retryable())
    }

    /// Whether the caller may safely resubmit the whole operation.
    ///
    /// True for conflicts and exhausted retries. Terminal-state violations,
    /// invalid data and gateway failures are not resubmittable as-is.
    #[must_use]
    pub const fn is_resubmittable(&self) -> bool {
        self.is_transaction_conflict() || matches!(self, Self::RetriesExhausted { .. })
    }
}

impl From<serde_json::Error> for ControlError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialisation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_distinguishable_from_terminal_violations() {
        let conflict = ControlError::from(StoreError::conflict("changed"));
        let deleting = ControlError::AlreadyDeleting {
            user: "alice".to_owned(),
            demo_id: DemoId::new(1),
        };

        assert!(conflict.is_transaction_conflict());
        assert!(conflict.is_resubmittable());
        assert!(!deleting.is_transaction_conflict());
        assert!(!deleting.is_resubmittable());
    }

    #[test]
    fn exhausted_retries_are_resubmittable() {
        let err = ControlError::RetriesExhausted {
            operation: "reserve_names",
            target: "user alice".to_owned(),
            attempts: 6,
        };
        assert!(err.is_resubmittable());
        assert!(!err.is_transaction_conflict());
        assert_eq!(
            err.to_string(),
            "abandoning reserve_names for user alice after 6 unsuccessful attempts"
        );
    }

    #[test]
    fn fatal_kinds_are_not_resubmittable() {
        assert!(!ControlError::invalid_state("status BOGUS").is_resubmittable());
        assert!(!ControlError::UnsupportedTemplate("MULTI".to_owned()).is_resubmittable());
        assert!(!ControlError::gateway("500").is_resubmittable());
    }
}
