//! Provider model - external identity (OAuth/OIDC subject) linked to an account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{Entity, EntityKind, Partition, RecordHeader, Reference, ReferenceKind};

/// Provider lookups go through (sub, issuer).
pub const SUBJECT: ReferenceKind = ReferenceKind {
    name: "sub",
    columns: &["sub", "issuer"],
};

pub const BY_ACCOUNT: &str = "account";

/// Provider link entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Provider {
    #[serde(flatten)]
    #[sqlx(flatten)]
    header: RecordHeader,
    pub account_id: String,
    pub sub: String,
    pub issuer: String,
}

impl Provider {
    pub fn new(now: DateTime<Utc>, account_id: String, sub: String, issuer: String) -> Self {
        Self {
            header: RecordHeader::new(now),
            account_id,
            sub,
            issuer,
        }
    }

    pub fn subject_reference(sub: impl Into<String>, issuer: impl Into<String>) -> Reference {
        Reference::new(SUBJECT, vec![sub.into(), issuer.into()])
    }

    pub fn account_partition(account_id: impl Into<String>) -> Partition {
        Partition::new(BY_ACCOUNT, "account_id", account_id)
    }
}

impl Entity for Provider {
    const KIND: EntityKind = EntityKind::Provider;

    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn references(&self) -> Vec<Reference> {
        vec![Self::subject_reference(
            self.sub.as_str(),
            self.issuer.as_str(),
        )]
    }

    fn partitions(&self) -> Vec<Partition> {
        vec![Self::account_partition(self.account_id.as_str())]
    }
}
