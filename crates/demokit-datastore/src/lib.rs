//! Entity-group document store for demokit.
//!
//! Records are stored as [`Entity`] values addressed by hierarchical [`Key`]s.
//! The root of a key path forms the entity group, and every read-modify-write
//! sequence runs inside an optimistic [`Transaction`]: commits fail with
//! [`StoreError::Conflict`] when anything the transaction observed has changed
//! since it was read.
//!
//! Two backends implement [`Datastore`]:
//!
//! - [`MemoryDatastore`] (feature `memory`, on by default) keeps everything in
//!   process and is what the test suites run against.
//! - [`PostgresDatastore`] (feature `postgres`) stores entities as JSONB rows
//!   and re-checks entity versions under row locks at commit time.

#![forbid(unsafe_code)]

mod entity;
mod error;
mod key;
mod query;
mod traits;

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "postgres")]
mod postgres;

pub use entity::{EmbeddedEntity, Entity, PropertyMap, Value};
pub use error::{StoreError, StoreResult};
pub use key::{Key, KeyId};
pub use query::{Direction, Filter, Query, Sort};
pub use traits::{Datastore, Transaction};

#[cfg(feature = "memory")]
pub use memory::MemoryDatastore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresDatastore;
