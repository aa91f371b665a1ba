use async_trait::async_trait;

use crate::entity::Entity;
use crate::error::StoreResult;
use crate::key::Key;
use crate::query::Query;

/// A document store with entity-group transactions.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Point read. Returns `None` when no entity exists under `key`.
    async fn get(&self, key: &Key) -> StoreResult<Option<Entity>>;

    /// Unconditional write. Allocates a numeric id for an incomplete key and
    /// returns the complete key the entity was stored under.
    async fn put(&self, entity: Entity) -> StoreResult<Key>;

    /// Unconditional delete. Deleting a missing entity is not an error.
    async fn delete(&self, key: &Key) -> StoreResult<()>;

    /// Run a query outside of any transaction.
    async fn query(&self, query: &Query) -> StoreResult<Vec<Entity>>;

    /// Start an optimistic transaction.
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>>;
}

/// An optimistic transaction.
///
/// Reads record the version of what they observed; writes are buffered until
/// [`commit`](Transaction::commit), which fails with
/// [`StoreError::Conflict`](crate::StoreError::Conflict) if any observed
/// entity has changed in the meantime. After a commit attempt, successful or
/// not, the transaction is no longer active.
#[async_trait]
pub trait Transaction: Send {
    /// Transactional point read.
    async fn get(&mut self, key: &Key) -> StoreResult<Option<Entity>>;

    /// Buffer a write. The key must be complete.
    fn put(&mut self, entity: Entity) -> StoreResult<()>;

    /// Buffer a delete. The key must be complete.
    fn delete(&mut self, key: &Key) -> StoreResult<()>;

    /// Apply buffered writes atomically, or fail with a conflict.
    async fn commit(&mut self) -> StoreResult<()>;

    /// Discard buffered writes.
    async fn rollback(&mut self) -> StoreResult<()>;

    /// Whether the transaction can still be used.
    fn is_active(&self) -> bool;
}
