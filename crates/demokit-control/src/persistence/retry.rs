//! Bounded retry of optimistic transactions.

use std::time::Duration;

use demokit_datastore::{Datastore, Transaction};
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::config::PersistenceConfig;
use crate::error::{ControlError, ControlResult};

/// How often, and how patiently, a conflicting transaction is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Pause before each retry.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Build a policy from configuration.
    #[must_use]
    pub const fn from_config(config: &PersistenceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.retry_delay(),
        }
    }

    /// Total attempts, counting the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PersistenceConfig::default())
    }
}

/// Run `block` inside a fresh transaction and commit it, retrying on conflict.
///
/// Each attempt begins a new transaction. Only conflicts and interruptions
/// (from the block or from the commit) are retried; any other error is
/// returned at once. A transaction left open by a failed attempt is rolled
/// back before the next attempt or before the error is returned. Once
/// `policy.max_attempts()` attempts have conflicted the call fails with
/// [`ControlError::RetriesExhausted`].
pub async fn run_in_transaction<T, F>(
    store: &dyn Datastore,
    policy: &RetryPolicy,
    operation: &'static str,
    target: &str,
    mut block: F,
) -> ControlResult<T>
where
    T: Send,
    F: for<'t> FnMut(&'t mut dyn Transaction) -> BoxFuture<'t, ControlResult<T>> + Send,
{
    let attempts = policy.max_attempts();

    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(policy.delay).await;
        }

        let mut txn = store.begin().await?;
        let outcome = block(txn.as_mut()).await;
        let result = match outcome {
            Ok(value) => txn.commit().await.map(|()| value).map_err(ControlError::from),
            Err(err) => Err(err),
        };

        if txn.is_active() {
            if let Err(err) = txn.rollback().await {
                warn!(operation, target, attempt, error = %err, "failed to roll back transaction");
            }
        }

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, target, attempt, "transaction committed after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transaction_conflict() => {
                warn!(
                    operation,
                    target,
                    attempt,
                    max_attempts = attempts,
                    error = %err,
                    "transaction conflict"
                );
            }
            Err(err) => return Err(err),
        }
    }

    Err(ControlError::RetriesExhausted {
        operation,
        target: target.to_owned(),
        attempts,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    use demokit_datastore::{Entity, Key, MemoryDatastore, StoreError};

    use super::*;

    fn quick(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            delay: Duration::ZERO,
        }
    }

    fn counter_key() -> Key {
        Key::named("User", "alice")
    }

    async fn increment(store: &MemoryDatastore, policy: &RetryPolicy) -> ControlResult<i64> {
        run_in_transaction(store, policy, "increment", "user alice", |txn| {
            Box::pin(async move {
                let current = match txn.get(&counter_key()).await? {
                    Some(entity) => entity.properties.get_i64("n")?,
                    None => 0,
                };
                let mut entity = Entity::new(counter_key());
                entity.properties.set("n", current + 1);
                txn.put(entity)?;
                Ok::<_, ControlError>(current + 1)
            })
        })
        .await
    }

    #[test]
    fn default_policy_allows_six_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.delay, Duration::from_millis(200));
        assert_eq!(policy.max_attempts(), 6);
    }

    #[tokio::test]
    async fn conflicts_are_retried_until_commit() {
        let store = MemoryDatastore::new();
        store.fail_next_commits(2);

        assert_eq!(increment(&store, &quick(5)).await.unwrap(), 1);
        assert_eq!(store.commit_attempts(), 3);
    }

    #[tokio::test]
    async fn exhausting_the_bound_reports_attempts() {
        let store = MemoryDatastore::new();
        store.fail_next_commits(100);

        let err = increment(&store, &quick(5)).await.unwrap_err();
        assert!(matches!(
            err,
            ControlError::RetriesExhausted { attempts: 6, operation: "increment", .. }
        ));
        assert_eq!(store.commit_attempts(), 6);
        assert!(store.get(&counter_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried_and_roll_back() {
        let store = MemoryDatastore::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let result: ControlResult<()> = run_in_transaction(&store, &quick(5), "fail", "t", |txn| {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                txn.put(Entity::new(counter_key()))?;
                Err::<(), _>(ControlError::invalid_state("status BOGUS"))
            })
        })
        .await;

        assert!(matches!(result, Err(ControlError::InvalidState(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.commit_attempts(), 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn interruptions_are_retried() {
        let store = MemoryDatastore::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let value = run_in_transaction(&store, &quick(5), "interrupt", "t", |_txn| {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(StoreError::Interrupted("woken early".to_owned()).into());
                }
                Ok::<_, ControlError>(7)
            })
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retries_wait_for_the_configured_delay() {
        let store = MemoryDatastore::new();
        store.fail_next_commits(2);
        let policy = RetryPolicy {
            max_retries: 5,
            delay: Duration::from_millis(20),
        };

        let started = Instant::now();
        increment(&store, &policy).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let store = MemoryDatastore::new();
        store.fail_next_commits(1);

        let err = increment(&store, &quick(0)).await.unwrap_err();
        assert!(matches!(err, ControlError::RetriesExhausted { attempts: 1, .. }));
    }
}
