//! Hierarchical entity keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// The final path element of a [`Key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyId {
    /// Application-chosen string name.
    Name(String),
    /// Store-allocated numeric id.
    Id(i64),
    /// Not yet allocated; the store assigns an id on `put`.
    Incomplete,
}

/// Address of an entity: a kind, an id, and an optional parent key.
///
/// The outermost ancestor is the entity group. Transactions and ancestor
/// queries are scoped by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    parent: Option<Box<Key>>,
    kind: String,
    id: KeyId,
}

impl Key {
    /// Create a root key with a string name.
    #[must_use]
    pub fn named(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            parent: None,
            kind: kind.into(),
            id: KeyId::Name(name.into()),
        }
    }

    /// Create a root key with a numeric id.
    #[must_use]
    pub fn numbered(kind: impl Into<String>, id: i64) -> Self {
        Self {
            parent: None,
            kind: kind.into(),
            id: KeyId::Id(id),
        }
    }

    /// Create a child key with a numeric id.
    #[must_use]
    pub fn child_numbered(&self, kind: impl Into<String>, id: i64) -> Self {
        Self {
            parent: Some(Box::new(self.clone())),
            kind: kind.into(),
            id: KeyId::Id(id),
        }
    }

    /// Create a child key whose id is allocated when the entity is stored.
    #[must_use]
    pub fn incomplete_child(&self, kind: impl Into<String>) -> Self {
        Self {
            parent: Some(Box::new(self.clone())),
            kind: kind.into(),
            id: KeyId::Incomplete,
        }
    }

    /// Entity kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Final path element.
    #[must_use]
    pub const fn id(&self) -> &KeyId {
        &self.id
    }

    /// Parent key, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.parent.as_deref()
    }

    /// String name, if this key is named.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match &self.id {
            KeyId::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Numeric id, if this key is numbered.
    #[must_use]
    pub const fn numeric_id(&self) -> Option<i64> {
        match self.id {
            KeyId::Id(id) => Some(id),
            _ => None,
        }
    }

    /// Whether this key and all of its ancestors have an id.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !matches!(self.id, KeyId::Incomplete) && self.parent().map_or(true, Self::is_complete)
    }

    /// Fail unless [`is_complete`](Self::is_complete).
    pub fn require_complete(&self) -> StoreResult<()> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(StoreError::IncompleteKey(self.to_string()))
        }
    }

    /// Replace an incomplete id with a freshly allocated one.
    #[must_use]
    pub fn with_allocated_id(mut self, id: i64) -> Self {
        if matches!(self.id, KeyId::Incomplete) {
            self.id = KeyId::Id(id);
        }
        self
    }

    /// The entity group this key belongs to.
    #[must_use]
    pub fn root(&self) -> &Self {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Whether `self` is a strict ancestor of `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        let mut current = other.parent();
        while let Some(key) = current {
            if key == self {
                return true;
            }
            current = key.parent();
        }
        false
    }

    /// Stable string encoding of the full key path, suitable as a primary key.
    pub fn encode(&self) -> StoreResult<String> {
        self.require_complete()?;
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent() {
            write!(f, "{parent}/")?;
        }
        match &self.id {
            KeyId::Name(name) => write!(f, "{}:{name}", self.kind),
            KeyId::Id(id) => write!(f, "{}:{id}", self.kind),
            KeyId::Incomplete => write!(f, "{}:?", self.kind),
        }
    }
}
