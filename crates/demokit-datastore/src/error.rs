//! Error types for the document store.

use thiserror::Error;

/// Result type alias using [`StoreError`].
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by [`Datastore`](crate::Datastore) backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An entity observed by the transaction changed before commit.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// The operation was cancelled before it completed.
    #[error("operation interrupted: {0}")]
    Interrupted(String),

    /// The transaction was already committed or rolled back.
    #[error("transaction is no longer active")]
    TransactionClosed,

    /// A key was used where a complete (named or numbered) key is required.
    #[error("incomplete key: {0}")]
    IncompleteKey(String),

    /// A property was missing or held a value of the wrong type.
    #[error("property '{property}': {reason}")]
    Property {
        /// Property name.
        property: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Database error.
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create a conflict error.
    #[must_use]
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a property error.
    #[must_use]
    pub fn property(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Property {
            property: property.into(),
            reason: reason.into(),
        }
    }

    /// Whether a fresh attempt of the same transaction may succeed.
    ///
    /// Only optimistic-concurrency conflicts and interruptions qualify; every
    /// other error indicates a logic or infrastructure fault.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Interrupted(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialisation(err.to_string())
    }
}
