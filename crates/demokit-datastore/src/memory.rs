//! In-process datastore for tests and single-node development.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use crate::entity::Entity;
use crate::error::{StoreError, StoreResult};
use crate::key::Key;
use crate::query::Query;
use crate::traits::{Datastore, Transaction};

#[derive(Debug, Clone)]
struct Stored {
    version: u64,
    entity: Entity,
}

#[derive(Debug, Default)]
struct Shared {
    entities: RwLock<BTreeMap<Key, Stored>>,
    next_id: AtomicI64,
    next_version: AtomicU64,
    forced_conflicts: AtomicUsize,
    commit_attempts: AtomicUsize,
}

impl Shared {
    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn allocate_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// In-memory datastore.
///
/// Every write, transactional or not, stamps the entity with a fresh version
/// drawn from a store-wide counter. A missing entity has version 0, so a
/// transaction that observed absence conflicts with a concurrent insert.
/// Data is lost when the last clone is dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatastore {
    shared: Arc<Shared>,
}

impl MemoryDatastore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` transaction commits fail with a conflict.
    ///
    /// Used to exercise retry paths deterministically.
    pub fn fail_next_commits(&self, count: usize) {
        self.shared.forced_conflicts.store(count, Ordering::SeqCst);
    }

    /// Total number of transaction commits attempted against this store.
    #[must_use]
    pub fn commit_attempts(&self) -> usize {
        self.shared.commit_attempts.load(Ordering::SeqCst)
    }

    /// Number of stored entities.
    pub async fn len(&self) -> usize {
        self.shared.entities.read().await.len()
    }

    /// Whether the store holds no entities.
    pub async fn is_empty(&self) -> bool {
        self.shared.entities.read().await.is_empty()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn get(&self, key: &Key) -> StoreResult<Option<Entity>> {
        key.require_complete()?;
        let entities = self.shared.entities.read().await;
        Ok(entities.get(key).map(|stored| stored.entity.clone()))
    }

    async fn put(&self, mut entity: Entity) -> StoreResult<Key> {
        if !entity.key.is_complete() {
            entity.key = entity.key.with_allocated_id(self.shared.allocate_id());
            entity.key.require_complete()?;
        }
        let key = entity.key.clone();
        let version = self.shared.allocate_version();

        let mut entities = self.shared.entities.write().await;
        entities.insert(key.clone(), Stored { version, entity });
        trace!(key = %key, version, "entity stored");

        Ok(key)
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        key.require_complete()?;
        let mut entities = self.shared.entities.write().await;
        entities.remove(key);
        Ok(())
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Entity>> {
        let entities = self.shared.entities.read().await;
        let candidates = entities
            .values()
            .filter(|stored| query.matches(&stored.entity))
            .map(|stored| stored.entity.clone())
            .collect::<Vec<_>>();
        Ok(query.apply(candidates))
    }

    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            observed: HashMap::new(),
            writes: BTreeMap::new(),
            active: true,
        }))
    }
}

struct MemoryTransaction {
    shared: Arc<Shared>,
    observed: HashMap<Key, u64>,
    writes: BTreeMap<Key, Option<Entity>>,
    active: bool,
}

impl MemoryTransaction {
    const fn ensure_active(&self) -> StoreResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(StoreError::TransactionClosed)
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, key: &Key) -> StoreResult<Option<Entity>> {
        self.ensure_active()?;
        key.require_complete()?;

        let entities = self.shared.entities.read().await;
        let stored = entities.get(key);
        let version = stored.map_or(0, |s| s.version);
        self.observed.entry(key.clone()).or_insert(version);

        Ok(stored.map(|s| s.entity.clone()))
    }

    fn put(&mut self, entity: Entity) -> StoreResult<()> {
        self.ensure_active()?;
        entity.key.require_complete()?;
        self.writes.insert(entity.key.clone(), Some(entity));
        Ok(())
    }

    fn delete(&mut self, key: &Key) -> StoreResult<()> {
        self.ensure_active()?;
        key.require_complete()?;
        self.writes.insert(key.clone(), None);
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.ensure_active()?;
        self.active = false;
        self.shared.commit_attempts.fetch_add(1, Ordering::SeqCst);

        if self.shared.take_forced_conflict() {
            return Err(StoreError::conflict("commit rejected by injected conflict"));
        }

        let mut entities = self.shared.entities.write().await;
        for (key, observed) in &self.observed {
            let current = entities.get(key).map_or(0, |s| s.version);
            if current != *observed {
                return Err(StoreError::conflict(format!(
                    "{key} changed since it was read (version {observed} -> {current})"
                )));
            }
        }

        for (key, write) in std::mem::take(&mut self.writes) {
            match write {
                Some(entity) => {
                    let version = self.shared.allocate_version();
                    entities.insert(key, Stored { version, entity });
                }
                None => {
                    entities.remove(&key);
                }
            }
        }

        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.ensure_active()?;
        self.active = false;
        self.writes.clear();
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::query::Direction;

    fn user() -> Key {
        Key::named("User", "alice")
    }

    fn counter(value: i64) -> Entity {
        let mut entity = Entity::new(user());
        entity.properties.set("suffix", value);
        entity
    }

    #[tokio::test]
    async fn put_allocates_distinct_ids() {
        let store = MemoryDatastore::new();

        let first = store
            .put(Entity::new(user().incomplete_child("Demo")))
            .await
            .unwrap();
        let second = store
            .put(Entity::new(user().incomplete_child("Demo")))
            .await
            .unwrap();

        assert!(first.is_complete());
        assert_ne!(first, second);
        assert_eq!(first.parent(), Some(&user()));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn get_missing_returns_none_and_delete_is_idempotent() {
        let store = MemoryDatastore::new();
        let key = user().child_numbered("Demo", 1);

        assert!(store.get(&key).await.unwrap().is_none());
        store.delete(&key).await.unwrap();
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn query_scopes_by_ancestor() {
        let store = MemoryDatastore::new();
        for user in ["alice", "bob"] {
            let mut entity = Entity::new(Key::named("User", user).incomplete_child("Demo"));
            entity.properties.set("status", "CREATED");
            entity.properties.set("creationTime", chrono::Utc::now());
            store.put(entity).await.unwrap();
        }

        let query = Query::new("Demo")
            .with_ancestor(user())
            .with_filter("status", "CREATED")
            .with_sort("creationTime", Direction::Descending);
        let results = store.query(&query).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key.root(), &user());
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = MemoryDatastore::new();

        let mut txn = store.begin().await.unwrap();
        assert!(txn.get(&user()).await.unwrap().is_none());
        txn.put(counter(1)).unwrap();
        txn.commit().await.unwrap();
        assert!(!txn.is_active());

        let stored = store.get(&user()).await.unwrap().unwrap();
        assert_eq!(stored.properties.get_i64("suffix").unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_read_modify_write_conflicts() {
        let store = MemoryDatastore::new();
        store.put(counter(0)).await.unwrap();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.get(&user()).await.unwrap();
        second.get(&user()).await.unwrap();

        first.put(counter(1)).unwrap();
        first.commit().await.unwrap();

        second.put(counter(1)).unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!second.is_active());
    }

    #[tokio::test]
    async fn observed_absence_conflicts_with_insert() {
        let store = MemoryDatastore::new();

        let mut txn = store.begin().await.unwrap();
        assert!(txn.get(&user()).await.unwrap().is_none());

        store.put(counter(5)).await.unwrap();

        txn.put(counter(1)).unwrap();
        assert!(matches!(
            txn.commit().await,
            Err(StoreError::Conflict(_))
        ));
        let stored = store.get(&user()).await.unwrap().unwrap();
        assert_eq!(stored.properties.get_i64("suffix").unwrap(), 5);
    }

    #[tokio::test]
    async fn rollback_discards_writes_and_closes() {
        let store = MemoryDatastore::new();

        let mut txn = store.begin().await.unwrap();
        txn.put(counter(1)).unwrap();
        txn.rollback().await.unwrap();

        assert!(!txn.is_active());
        assert!(store.get(&user()).await.unwrap().is_none());
        assert!(matches!(
            txn.put(counter(2)),
            Err(StoreError::TransactionClosed)
        ));
        assert!(matches!(
            txn.commit().await,
            Err(StoreError::TransactionClosed)
        ));
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed() {
        let store = MemoryDatastore::new();
        store.fail_next_commits(1);

        let mut txn = store.begin().await.unwrap();
        txn.put(counter(1)).unwrap();
        assert!(matches!(
            txn.commit().await,
            Err(StoreError::Conflict(_))
        ));

        let mut txn = store.begin().await.unwrap();
        txn.put(counter(1)).unwrap();
        txn.commit().await.unwrap();

        assert_eq!(store.commit_attempts(), 2);
    }

    #[tokio::test]
    async fn transactional_writes_require_complete_keys() {
        let store = MemoryDatastore::new();
        let mut txn = store.begin().await.unwrap();
        let result = txn.put(Entity::new(user().incomplete_child("Demo")));
        assert!(matches!(result, Err(StoreError::IncompleteKey(_))));
    }
}
