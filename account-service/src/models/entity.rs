//! The contract every cached entity fulfils.
//!
//! An entity names its kind (which decides table and cache namespace), hands
//! out its record header, and lists the secondary keys and listing partitions
//! it belongs to. The generic repository drives the store and the caches from
//! nothing more than this.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

use super::RecordHeader;

/// Entity kinds known to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Account,
    Session,
    Verification,
    ResetPassword,
    EmailChange,
    Provider,
}

impl EntityKind {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Account => "account",
            EntityKind::Session => "session",
            EntityKind::Verification => "verification",
            EntityKind::ResetPassword => "reset_password",
            EntityKind::EmailChange => "update_email",
            EntityKind::Provider => "provider",
        }
    }

    /// Suffix appended to the configured prefix to form the table name.
    pub fn table_suffix(&self) -> &'static str {
        match self {
            EntityKind::Account => "",
            EntityKind::Session => "_session",
            EntityKind::Verification => "_verification",
            EntityKind::ResetPassword => "_reset_password",
            EntityKind::EmailChange => "_update_email",
            EntityKind::Provider => "_provider",
        }
    }

    /// Segment appended to the prefix to form the cache namespace.
    /// Accounts live directly under the prefix.
    pub fn key_segment(&self) -> Option<&'static str> {
        match self {
            EntityKind::Account => None,
            other => Some(other.as_str()),
        }
    }
}

/// A secondary unique key: its cache name and the columns backing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReferenceKind {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

/// A concrete secondary key value, one value per column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub values: Vec<String>,
}

impl Reference {
    pub fn new(kind: ReferenceKind, values: Vec<String>) -> Self {
        Self { kind, values }
    }

    pub fn single(kind: ReferenceKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            values: vec![value.into()],
        }
    }
}

/// A partitioned listing, e.g. the sessions of one account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    pub name: &'static str,
    pub column: &'static str,
    pub value: String,
}

impl Partition {
    pub fn new(name: &'static str, column: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            column,
            value: value.into(),
        }
    }
}

pub trait Entity: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;

    fn header(&self) -> &RecordHeader;

    fn header_mut(&mut self) -> &mut RecordHeader;

    fn public_id(&self) -> &str {
        self.header().public_id()
    }

    /// Secondary keys currently held by this value.
    fn references(&self) -> Vec<Reference> {
        Vec::new()
    }

    /// Partitioned listings this value belongs to, besides the global one.
    fn partitions(&self) -> Vec<Partition> {
        Vec::new()
    }

    /// Ordering score inside listings: creation time in microseconds.
    fn listing_score(&self) -> i64 {
        self.header().created_at().timestamp_micros()
    }
}
