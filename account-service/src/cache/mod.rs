//! Cache layer: the backend seam plus the three typed caches built on it.
//!
//! [`CacheStore`] is the only thing that talks to the cache server. The
//! primary, reference and listing caches translate entity operations into
//! [`CacheOp`]s so the repository can ship one logical write as a single
//! atomic [`CacheBatch`].

mod keys;
mod listing;
mod memory;
mod primary;
mod redis;
mod reference;

use async_trait::async_trait;
use thiserror::Error;

pub use keys::Keyspace;
pub use listing::{ListingCache, ListingFetch};
pub use memory::MemoryCache;
pub use primary::PrimaryCache;
pub use redis::RedisCache;
pub use reference::ReferenceCache;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache operation timed out")]
    Timeout,

    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// TTLs applied by the typed caches, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl {
    pub entry_secs: u64,
    pub blank_secs: u64,
    pub listing_secs: u64,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            entry_secs: 3600,
            blank_secs: 300,
            listing_secs: 3600,
        }
    }
}

/// A single cache mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOp {
    Set {
        key: String,
        value: String,
        ttl_secs: u64,
    },
    Delete {
        key: String,
    },
    /// Add to a sorted set and refresh the set's TTL.
    SortedAdd {
        key: String,
        member: String,
        score: f64,
        ttl_secs: u64,
    },
    SortedRemove {
        key: String,
        member: String,
    },
}

/// Mutations applied together; backends execute a batch atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheBatch {
    ops: Vec<CacheOp>,
}

impl CacheBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: CacheOp) {
        self.ops.push(op);
    }

    pub fn extend(&mut self, ops: impl IntoIterator<Item = CacheOp>) {
        self.ops.extend(ops);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[CacheOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<CacheOp> {
        self.ops
    }
}

impl From<Vec<CacheOp>> for CacheBatch {
    fn from(ops: Vec<CacheOp>) -> Self {
        Self { ops }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Score range read from a sorted set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeQuery {
    pub direction: SortDirection,
    /// Exclusive bound: only members strictly after this score.
    pub after: Option<f64>,
    pub limit: usize,
}

/// Outcome of a cache-only lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    /// Entry present. `stale_blank` reports a blank marker that should not
    /// coexist with it.
    Hit { value: T, stale_blank: bool },
    /// Confirmed absent.
    Blank,
    /// Nothing cached either way.
    Miss,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Values for `keys`, in order; `None` for absent keys.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;

    /// Existence of each key, in order.
    async fn exists_many(&self, keys: &[String]) -> Result<Vec<bool>, CacheError>;

    /// Apply every op in the batch atomically.
    async fn apply(&self, batch: CacheBatch) -> Result<(), CacheError>;

    /// Members of a sorted set with their scores.
    async fn range(&self, key: &str, query: &RangeQuery) -> Result<Vec<(String, f64)>, CacheError>;

    async fn health_check(&self) -> Result<(), CacheError>;
}
