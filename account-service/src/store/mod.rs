//! Relational store seam.
//!
//! The store is the source of truth. [`PgStore`] talks to PostgreSQL;
//! [`MemoryStore`] keeps rows in process and counts calls so tests can
//! assert when the store was (or was not) consulted.

mod columns;
mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::models::{Entity, Partition, Reference, Session};

pub use columns::PgRecord;
pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store operation timed out")]
    Timeout,
}

/// How a single record is looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    PublicId(String),
    Reference(Reference),
}

impl Lookup {
    pub fn public_id(id: impl Into<String>) -> Self {
        Lookup::PublicId(id.into())
    }
}

impl From<Reference> for Lookup {
    fn from(reference: Reference) -> Self {
        Lookup::Reference(reference)
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::PublicId(id) => write!(f, "public_id={}", id),
            Lookup::Reference(r) => write!(f, "{}={}", r.kind.name, r.values.join(",")),
        }
    }
}

#[async_trait]
pub trait RecordStore<E: Entity>: Send + Sync {
    /// Insert a new row; returns it with the system id assigned.
    async fn insert(&self, entity: &E) -> Result<E, StoreError>;

    /// Overwrite the row with the entity's system id.
    async fn update(&self, entity: &E) -> Result<E, StoreError>;

    async fn delete(&self, entity: &E) -> Result<(), StoreError>;

    async fn find(&self, lookup: &Lookup) -> Result<E, StoreError>;

    /// Every row in the partition (or every row at all), oldest first.
    async fn find_partition(&self, partition: Option<&Partition>) -> Result<Vec<E>, StoreError>;

    /// Up to `limit` rows with system id above `after_id`, in id order.
    async fn scan(&self, after_id: i64, limit: i64) -> Result<Vec<E>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SessionStore: RecordStore<Session> {
    /// Delete sessions that are both revoked and expired; returns what was removed.
    async fn purge_invalid(&self, now: DateTime<Utc>) -> Result<Vec<Session>, StoreError>;
}
