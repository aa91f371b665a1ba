//! PostgreSQL datastore implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, trace};

use crate::entity::{Entity, PropertyMap};
use crate::error::{StoreError, StoreResult};
use crate::key::Key;
use crate::query::Query;
use crate::traits::{Datastore, Transaction};

/// SQLSTATE codes that mean "another writer got there first".
const CONFLICT_CODES: &[&str] = &["40001", "40P01", "23505"];

/// SQLSTATE code for a cancelled statement.
const QUERY_CANCELED: &str = "57014";

/// PostgreSQL-backed datastore.
///
/// Entities live in a single `entities` table keyed by their encoded key
/// path, with the properties as JSONB and a per-row version counter. The
/// entity group (root key path) is indexed so ancestor queries only scan
/// one group; filtering and ordering are applied after decoding.
#[derive(Clone)]
pub struct PostgresDatastore {
    pool: PgPool,
}

impl PostgresDatastore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn new(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(map_sqlx_error)?;

        Self::from_pool(pool).await
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query("CREATE SEQUENCE IF NOT EXISTS entity_ids")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                path TEXT PRIMARY KEY,
                root_path TEXT NOT NULL,
                kind TEXT NOT NULL,
                key JSONB NOT NULL,
                properties JSONB NOT NULL,
                version BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS entities_kind_root_idx ON entities (kind, root_path)",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn allocate_id(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT nextval('entity_ids') AS id")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.get("id"))
    }

    fn row_to_entity(row: &PgRow) -> StoreResult<Entity> {
        let key: serde_json::Value = row.get("key");
        let properties: serde_json::Value = row.get("properties");

        Ok(Entity {
            key: serde_json::from_value::<Key>(key)?,
            properties: serde_json::from_value::<PropertyMap>(properties)?,
        })
    }
}

impl std::fmt::Debug for PostgresDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDatastore").finish_non_exhaustive()
    }
}

/// Column values for one entity row.
struct EncodedEntity {
    path: String,
    root_path: String,
    kind: String,
    key: serde_json::Value,
    properties: serde_json::Value,
}

impl EncodedEntity {
    fn new(entity: &Entity) -> StoreResult<Self> {
        Ok(Self {
            path: entity.key.encode()?,
            root_path: entity.key.root().encode()?,
            kind: entity.key.kind().to_owned(),
            key: serde_json::to_value(&entity.key)?,
            properties: serde_json::to_value(&entity.properties)?,
        })
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    let code = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned());

    match code.as_deref() {
        Some(code) if CONFLICT_CODES.contains(&code) => {
            StoreError::conflict(format!("database reported {code}: {err}"))
        }
        Some(QUERY_CANCELED) => StoreError::Interrupted(err.to_string()),
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl Datastore for PostgresDatastore {
    async fn get(&self, key: &Key) -> StoreResult<Option<Entity>> {
        let row = sqlx::query("SELECT key, properties FROM entities WHERE path = $1")
            .bind(key.encode()?)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(Self::row_to_entity).transpose()
    }

    async fn put(&self, mut entity: Entity) -> StoreResult<Key> {
        if !entity.key.is_complete() {
            let id = self.allocate_id().await?;
            entity.key = entity.key.with_allocated_id(id);
        }
        let encoded = EncodedEntity::new(&entity)?;

        sqlx::query(
            r#"
            INSERT INTO entities (path, root_path, kind, key, properties, version)
            VALUES ($1, $2, $3, $4, $5, 1)
            ON CONFLICT (path) DO UPDATE
            SET properties = EXCLUDED.properties, version = entities.version + 1
            "#,
        )
        .bind(&encoded.path)
        .bind(&encoded.root_path)
        .bind(&encoded.kind)
        .bind(&encoded.key)
        .bind(&encoded.properties)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        trace!(key = %entity.key, "entity stored");
        Ok(entity.key)
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        sqlx::query("DELETE FROM entities WHERE path = $1")
            .bind(key.encode()?)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Entity>> {
        let rows = match &query.ancestor {
            Some(ancestor) => {
                sqlx::query(
                    "SELECT key, properties FROM entities WHERE kind = $1 AND root_path = $2",
                )
                .bind(&query.kind)
                .bind(ancestor.root().encode()?)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT key, properties FROM entities WHERE kind = $1")
                    .bind(&query.kind)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(map_sqlx_error)?;

        let entities = rows
            .iter()
            .map(Self::row_to_entity)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(query.apply(entities))
    }

    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        Ok(Box::new(PostgresTransaction {
            pool: self.pool.clone(),
            observed: BTreeMap::new(),
            writes: BTreeMap::new(),
            active: true,
        }))
    }
}

/// Optimistic transaction over [`PostgresDatastore`].
///
/// Reads go straight to the pool and remember the row version they saw
/// (0 for a missing row). Commit opens a database transaction, locks every
/// observed row, verifies the versions and only then applies the buffered
/// writes.
struct PostgresTransaction {
    pool: PgPool,
    observed: BTreeMap<String, i64>,
    writes: BTreeMap<String, Option<Entity>>,
    active: bool,
}

impl PostgresTransaction {
    const fn ensure_active(&self) -> StoreResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(StoreError::TransactionClosed)
        }
    }

    async fn apply(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        for (path, observed) in &self.observed {
            let current: i64 = sqlx::query("SELECT version FROM entities WHERE path = $1 FOR UPDATE")
                .bind(path)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?
                .map_or(0, |row| row.get("version"));

            if current != *observed {
                debug!(path = %path, observed, current, "version mismatch at commit");
                return Err(StoreError::conflict(format!(
                    "{path} changed since it was read (version {observed} -> {current})"
                )));
            }
        }

        for (path, write) in &self.writes {
            match (write, self.observed.get(path)) {
                (None, _) => {
                    sqlx::query("DELETE FROM entities WHERE path = $1")
                        .bind(path)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;
                }
                (Some(entity), Some(version)) if *version > 0 => {
                    let encoded = EncodedEntity::new(entity)?;
                    sqlx::query(
                        "UPDATE entities SET properties = $2, version = version + 1 WHERE path = $1",
                    )
                    .bind(&encoded.path)
                    .bind(&encoded.properties)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
                }
                (Some(entity), Some(_)) => {
                    // Observed as missing: a plain insert turns a racing insert
                    // into a unique violation, which maps to a conflict.
                    let encoded = EncodedEntity::new(entity)?;
                    sqlx::query(
                        r#"
                        INSERT INTO entities (path, root_path, kind, key, properties, version)
                        VALUES ($1, $2, $3, $4, $5, 1)
                        "#,
                    )
                    .bind(&encoded.path)
                    .bind(&encoded.root_path)
                    .bind(&encoded.kind)
                    .bind(&encoded.key)
                    .bind(&encoded.properties)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
                }
                (Some(entity), None) => {
                    let encoded = EncodedEntity::new(entity)?;
                    sqlx::query(
                        r#"
                        INSERT INTO entities (path, root_path, kind, key, properties, version)
                        VALUES ($1, $2, $3, $4, $5, 1)
                        ON CONFLICT (path) DO UPDATE
                        SET properties = EXCLUDED.properties, version = entities.version + 1
                        "#,
                    )
                    .bind(&encoded.path)
                    .bind(&encoded.root_path)
                    .bind(&encoded.kind)
                    .bind(&encoded.key)
                    .bind(&encoded.properties)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
                }
            }
        }

        tx.commit().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn get(&mut self, key: &Key) -> StoreResult<Option<Entity>> {
        self.ensure_active()?;
        let path = key.encode()?;

        let row = sqlx::query("SELECT key, properties, version FROM entities WHERE path = $1")
            .bind(&path)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let version = row.as_ref().map_or(0, |r| r.get::<i64, _>("version"));
        self.observed.entry(path).or_insert(version);

        row.as_ref().map(PostgresDatastore::row_to_entity).transpose()
    }

    fn put(&mut self, entity: Entity) -> StoreResult<()> {
        self.ensure_active()?;
        let path = entity.key.encode()?;
        self.writes.insert(path, Some(entity));
        Ok(())
    }

    fn delete(&mut self, key: &Key) -> StoreResult<()> {
        self.ensure_active()?;
        self.writes.insert(key.encode()?, None);
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.ensure_active()?;
        self.active = false;
        // Dropping the sqlx transaction on an early return rolls it back.
        let result = self.apply().await;
        self.writes.clear();
        result
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
mod tests {
    use super::*;

    #[test]
    fn encoded_rows_carry_the_entity_group() {
        let key = Key::named("User", "alice").child_numbered("Demo", 9);
        let mut entity = Entity::new(key.clone());
        entity.properties.set("status", "CREATED");

        let encoded = EncodedEntity::new(&entity).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(encoded.kind, "Demo");
        assert_eq!(
            encoded.root_path,
            Key::named("User", "alice").encode().unwrap_or_default()
        );
        assert_eq!(encoded.path, key.encode().unwrap_or_default());
    }

    #[test]
    fn incomplete_keys_are_rejected_before_sql() {
        let entity = Entity::new(Key::named("User", "alice").incomplete_child("Demo"));
        assert!(matches!(
            EncodedEntity::new(&entity),
            Err(StoreError::IncompleteKey(_))
        ));
    }
}
