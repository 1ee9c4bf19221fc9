//! Record header shared by every persisted entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Identity and timestamps carried by every row.
///
/// `id` is assigned by the relational store on insert and stays internal;
/// `public_id` is generated up front and is what callers and cache keys see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RecordHeader {
    id: i64,
    public_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RecordHeader {
    /// Header for a value that has not been inserted yet.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            public_id: new_public_id(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn system_id(&self) -> i64 {
        self.id
    }

    pub fn public_id(&self) -> &str {
        &self.public_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Whether the store has assigned a system id.
    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }

    pub(crate) fn assign_system_id(&mut self, id: i64) {
        self.id = id;
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// Opaque random identifier exposed to callers.
pub fn new_public_id() -> String {
    Uuid::new_v4().simple().to_string()
}
