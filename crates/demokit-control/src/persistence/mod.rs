//! Demo persistence.
//!
//! [`DemoRepository`] owns every read and write of demo and counter
//! entities. Read-modify-write operations go through
//! [`run_in_transaction`], so concurrent callers for the same user either
//! serialise or retry; nothing here holds an in-process lock.

mod retry;

pub use retry::{run_in_transaction, RetryPolicy};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use demokit_datastore::{
    Datastore, Direction, Entity, MemoryDatastore, PostgresDatastore, Query, Transaction,
};
use tracing::{debug, info};

use crate::codec::{
    counter_from_entity, counter_to_entity, demo_from_entity, demo_key, demo_properties,
    demo_to_entity, user_key, CREATION_TIME, DEMO_KIND, STATUS,
};
use crate::config::{DatastoreBackend, DatastoreConfig};
use crate::error::{ControlError, ControlResult};
use crate::types::{Demo, DemoId, DemoStatus, NewDemo, Resource, Username};

/// Open the configured document store.
pub async fn open_datastore(config: &DatastoreConfig) -> ControlResult<Arc<dyn Datastore>> {
    match config.backend {
        DatastoreBackend::Memory => {
            info!("using in-memory datastore");
            Ok(Arc::new(MemoryDatastore::new()))
        }
        DatastoreBackend::Postgres => {
            let store = PostgresDatastore::new(&config.url, config.max_connections).await?;
            info!(max_connections = config.max_connections, "connected to postgres datastore");
            Ok(Arc::new(store))
        }
    }
}

/// Default description for a demo created without one.
#[must_use]
pub fn default_description(user: &Username, at: chrono::DateTime<Utc>) -> String {
    format!("demo instance created by {user} at {at}")
}

/// Transactional store of demos and per-user name counters.
#[derive(Clone)]
pub struct DemoRepository {
    store: Arc<dyn Datastore>,
    policy: RetryPolicy,
}

impl DemoRepository {
    /// Create a repository over `store`.
    pub fn new(store: Arc<dyn Datastore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Store a new demo in the `CREATED` state.
    ///
    /// A single unconditional write: there is no prior read to conflict
    /// with, so it is not retried.
    pub async fn create_demo(&self, user: &Username, new: NewDemo) -> ControlResult<Demo> {
        let creation_time = Utc::now();
        let description = match new.description {
            Some(description) if !description.is_empty() => description,
            _ => default_description(user, creation_time),
        };

        let properties = demo_properties(
            DemoStatus::Created,
            &description,
            creation_time,
            &new.deployment_template,
            &[],
        )?;
        let key = self
            .store
            .put(Entity::with_properties(
                user_key(user).incomplete_child(DEMO_KIND),
                properties,
            ))
            .await?;
        let id = key
            .numeric_id()
            .map(DemoId::new)
            .ok_or_else(|| ControlError::internal(format!("store returned key {key} without an id")))?;

        info!(user = %user, demo_id = %id, "demo created");

        Ok(Demo {
            id,
            status: DemoStatus::Created,
            description,
            creation_time,
            deployment_template: new.deployment_template,
            resources: Vec::new(),
            deployment_status: None,
            deployment_metadata: BTreeMap::new(),
        })
    }

    /// Point read. `Ok(None)` when the demo does not exist.
    pub async fn get_demo(&self, user: &Username, id: DemoId) -> ControlResult<Option<Demo>> {
        let Some(entity) = self.store.get(&demo_key(user, id)).await? else {
            return Ok(None);
        };
        let (_, demo) = demo_from_entity(&entity)?;
        Ok(Some(demo))
    }

    /// Remove a demo record. Deleting a missing demo is not an error.
    pub async fn delete_demo(&self, user: &Username, id: DemoId) -> ControlResult<()> {
        self.store.delete(&demo_key(user, id)).await?;
        info!(user = %user, demo_id = %id, "demo deleted");
        Ok(())
    }

    /// Overwrite a demo's status, returning the updated record.
    pub async fn update_status(
        &self,
        user: &Username,
        id: DemoId,
        status: DemoStatus,
    ) -> ControlResult<Demo> {
        let target = format!("demo {id} of user {user}");
        let demo = run_in_transaction(
            self.store.as_ref(),
            &self.policy,
            "update_status",
            &target,
            |txn| Box::pin(update_status_in(txn, user.clone(), id, status, false)),
        )
        .await?;

        info!(user = %user, demo_id = %id, status = %status, "demo status updated");
        Ok(demo)
    }

    /// Move a demo forward to `status`, refusing to move it backward.
    ///
    /// The check runs inside the transaction against the committed status, so
    /// a teardown that lands between a caller's read and this write is never
    /// undone. Moving to the current status is a no-op write. Leaving
    /// `DELETING` fails with [`ControlError::AlreadyDeleting`].
    pub async fn advance_status(
        &self,
        user: &Username,
        id: DemoId,
        status: DemoStatus,
    ) -> ControlResult<Demo> {
        let target = format!("demo {id} of user {user}");
        let demo = run_in_transaction(
            self.store.as_ref(),
            &self.policy,
            "advance_status",
            &target,
            |txn| Box::pin(update_status_in(txn, user.clone(), id, status, true)),
        )
        .await?;

        info!(user = %user, demo_id = %id, status = %status, "demo status advanced");
        Ok(demo)
    }

    /// Reserve `count` contiguous name suffixes for `user`, returning the first.
    ///
    /// Concurrent reservations for the same user never overlap.
    pub async fn reserve_names(&self, user: &Username, count: u64) -> ControlResult<u64> {
        if count == 0 {
            return Err(ControlError::invalid_argument(
                "name reservation count must be positive",
            ));
        }

        let target = format!("user {user}");
        let first = run_in_transaction(
            self.store.as_ref(),
            &self.policy,
            "reserve_names",
            &target,
            |txn| Box::pin(reserve_names_in(txn, user.clone(), count)),
        )
        .await?;

        debug!(user = %user, first, count, "names reserved");
        Ok(first)
    }

    /// Replace a demo's resource list. An empty list is a no-op.
    pub async fn save_resources(
        &self,
        user: &Username,
        id: DemoId,
        resources: &[Resource],
    ) -> ControlResult<()> {
        if resources.is_empty() {
            return Ok(());
        }

        let target = format!("demo {id} of user {user}");
        run_in_transaction(
            self.store.as_ref(),
            &self.policy,
            "save_resources",
            &target,
            |txn| Box::pin(save_resources_in(txn, user.clone(), id, resources.to_vec())),
        )
        .await?;

        debug!(user = %user, demo_id = %id, count = resources.len(), "resources saved");
        Ok(())
    }

    /// A user's `CREATED` and `LAUNCHED` demos, newest first.
    pub async fn list_active(&self, user: &Username) -> ControlResult<Vec<Demo>> {
        let mut demos = Vec::new();
        for status in DemoStatus::ACTIVE {
            for (owner, demo) in self.query_status(status, Some(user)).await? {
                if &owner != user {
                    return Err(ControlError::internal(format!(
                        "queried active demos for user {user}, got demo {} of user {owner}",
                        demo.id
                    )));
                }
                demos.push(demo);
            }
        }

        sort_newest_first(&mut demos);
        Ok(demos)
    }

    /// Every demo with `status`, grouped by owner, each group newest first.
    pub async fn list_all_with_status(
        &self,
        status: DemoStatus,
    ) -> ControlResult<BTreeMap<Username, Vec<Demo>>> {
        let mut by_user: BTreeMap<Username, Vec<Demo>> = BTreeMap::new();
        for (owner, demo) in self.query_status(status, None).await? {
            by_user.entry(owner).or_default().push(demo);
        }
        for demos in by_user.values_mut() {
            sort_newest_first(demos);
        }
        Ok(by_user)
    }

    /// Demos stored under any label of `status`, optionally for one user.
    async fn query_status(
        &self,
        status: DemoStatus,
        user: Option<&Username>,
    ) -> ControlResult<Vec<(Username, Demo)>> {
        let mut found = Vec::new();
        for label in status.stored_labels() {
            let mut query = Query::new(DEMO_KIND)
                .with_filter(STATUS, *label)
                .with_sort(CREATION_TIME, Direction::Descending);
            if let Some(user) = user {
                query = query.with_ancestor(user_key(user));
            }

            for entity in self.store.query(&query).await? {
                found.push(demo_from_entity(&entity)?);
            }
        }
        Ok(found)
    }
}

impl std::fmt::Debug for DemoRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemoRepository")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn sort_newest_first(demos: &mut [Demo]) {
    demos.sort_by(|a, b| b.creation_time.cmp(&a.creation_time));
}

fn not_found(user: &Username, id: DemoId) -> ControlError {
    ControlError::NotFound {
        user: user.to_string(),
        demo_id: id,
    }
}

async fn update_status_in(
    txn: &mut dyn Transaction,
    user: Username,
    id: DemoId,
    status: DemoStatus,
    forward_only: bool,
) -> ControlResult<Demo> {
    let entity = txn
        .get(&demo_key(&user, id))
        .await?
        .ok_or_else(|| not_found(&user, id))?;

    let (owner, mut demo) = demo_from_entity(&entity)?;
    let current = demo.status;
    if forward_only && current > status {
        return Err(if current.is_terminal() {
            ControlError::AlreadyDeleting {
                user: user.to_string(),
                demo_id: id,
            }
        } else {
            ControlError::invalid_state(format!(
                "demo {id} cannot move from {current} back to {status}"
            ))
        });
    }
    debug!(user = %user, demo_id = %id, from = %current, to = %status, "writing status");

    demo.status = status;
    txn.put(demo_to_entity(&owner, &demo)?)?;
    Ok(demo)
}

async fn reserve_names_in(
    txn: &mut dyn Transaction,
    user: Username,
    count: u64,
) -> ControlResult<u64> {
    let stored = txn.get(&user_key(&user)).await?;
    let mut counter = counter_from_entity(&user, stored.as_ref())?;
    let first = counter.reserve(count)?;
    txn.put(counter_to_entity(&counter)?)?;
    Ok(first)
}

async fn save_resources_in(
    txn: &mut dyn Transaction,
    user: Username,
    id: DemoId,
    resources: Vec<Resource>,
) -> ControlResult<()> {
    let entity = txn
        .get(&demo_key(&user, id))
        .await?
        .ok_or_else(|| not_found(&user, id))?;

    let (owner, mut demo) = demo_from_entity(&entity)?;
    demo.resources = resources;
    txn.put(demo_to_entity(&owner, &demo)?)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::compute::InstanceSpec;
    use crate::config::ComputeConfig;
    use crate::deployment::DeploymentTemplate;

    fn alice() -> Username {
        Username::new("alice").unwrap()
    }

    fn repository() -> (MemoryDatastore, DemoRepository) {
        let store = MemoryDatastore::new();
        let policy = RetryPolicy {
            max_retries: 5,
            delay: Duration::ZERO,
        };
        (store.clone(), DemoRepository::new(Arc::new(store), policy))
    }

    fn new_demo(description: Option<&str>) -> NewDemo {
        NewDemo {
            description: description.map(str::to_owned),
            deployment_template: DeploymentTemplate::single_instance(
                InstanceSpec::with_defaults("alice-0", &ComputeConfig::default()),
            ),
        }
    }

    #[tokio::test]
    async fn create_then_get() {
        let (_, repo) = repository();
        let created = repo.create_demo(&alice(), new_demo(Some("mine"))).await.unwrap();
        let fetched = repo.get_demo(&alice(), created.id).await.unwrap().unwrap();

        assert_eq!(fetched.status, DemoStatus::Created);
        assert_eq!(fetched.description, "mine");
        assert_eq!(fetched.creation_time, created.creation_time);
        assert_eq!(fetched.deployment_template, created.deployment_template);
    }

    #[tokio::test]
    async fn missing_description_gets_a_default() {
        let (_, repo) = repository();
        let created = repo.create_demo(&alice(), new_demo(None)).await.unwrap();
        assert!(created.description.starts_with("demo instance created by alice at "));
    }

    #[tokio::test]
    async fn get_is_scoped_to_the_owner() {
        let (_, repo) = repository();
        let created = repo.create_demo(&alice(), new_demo(None)).await.unwrap();
        let bob = Username::new("bob").unwrap();
        assert!(repo.get_demo(&bob, created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_name_reservation_is_rejected_before_store_access() {
        let (store, repo) = repository();
        assert!(matches!(
            repo.reserve_names(&alice(), 0).await,
            Err(ControlError::InvalidArgument(_))
        ));
        assert_eq!(store.commit_attempts(), 0);
    }

    #[tokio::test]
    async fn empty_resource_list_is_a_no_op() {
        let (store, repo) = repository();
        repo.save_resources(&alice(), DemoId::new(99), &[]).await.unwrap();
        assert_eq!(store.commit_attempts(), 0);
    }

    #[tokio::test]
    async fn update_status_of_missing_demo_is_not_found() {
        let (_, repo) = repository();
        assert!(matches!(
            repo.update_status(&alice(), DemoId::new(5), DemoStatus::Launched).await,
            Err(ControlError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn update_status_preserves_the_record() {
        let (_, repo) = repository();
        let created = repo.create_demo(&alice(), new_demo(Some("keep"))).await.unwrap();

        let updated = repo
            .update_status(&alice(), created.id, DemoStatus::Launched)
            .await
            .unwrap();
        assert_eq!(updated.status, DemoStatus::Launched);
        assert_eq!(updated.description, "keep");
        assert_eq!(updated.creation_time, created.creation_time);
    }

    #[tokio::test]
    async fn advance_status_never_leaves_deleting() {
        let (_, repo) = repository();
        let created = repo.create_demo(&alice(), new_demo(None)).await.unwrap();
        repo.advance_status(&alice(), created.id, DemoStatus::Deleting)
            .await
            .unwrap();

        assert!(matches!(
            repo.advance_status(&alice(), created.id, DemoStatus::Launched).await,
            Err(ControlError::AlreadyDeleting { .. })
        ));
        let again = repo
            .advance_status(&alice(), created.id, DemoStatus::Deleting)
            .await
            .unwrap();
        assert_eq!(again.status, DemoStatus::Deleting);
    }

    #[tokio::test]
    async fn legacy_active_records_are_listed_as_created() {
        let (store, repo) = repository();
        let created = repo.create_demo(&alice(), new_demo(None)).await.unwrap();

        let key = demo_key(&alice(), created.id);
        let mut entity = store.get(&key).await.unwrap().unwrap();
        entity.properties.set(STATUS, "ACTIVE");
        store.put(entity).await.unwrap();

        let active = repo.list_active(&alice()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, DemoStatus::Created);

        let grouped = repo.list_all_with_status(DemoStatus::Created).await.unwrap();
        assert_eq!(grouped.get(&alice()).map(Vec::len), Some(1));
    }
}
