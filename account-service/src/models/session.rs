//! Session model - one refresh-token session per authenticated device.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{Entity, EntityKind, Partition, RecordHeader, Reference, ReferenceKind};

pub const REFRESH_TOKEN: ReferenceKind = ReferenceKind {
    name: "token",
    columns: &["refresh_token_hash"],
};

/// Listing partition holding the sessions of one account.
pub const BY_ACCOUNT: &str = "account";

/// Device details captured when a session is issued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: Option<String>,
    pub device_type: Option<String>,
    pub user_agent: Option<String>,
}

/// Session entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Session {
    #[serde(flatten)]
    #[sqlx(flatten)]
    header: RecordHeader,
    pub account_id: String,
    pub device_id: Option<String>,
    pub device_type: Option<String>,
    pub user_agent: Option<String>,
    /// SHA-256 of the refresh token; the raw token is never stored.
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session expiring `lifespan` from `now`.
    pub fn new(
        now: DateTime<Utc>,
        account_id: String,
        device: DeviceInfo,
        refresh_token_hash: String,
        lifespan: Duration,
    ) -> Self {
        Self {
            header: RecordHeader::new(now),
            account_id,
            device_id: device.device_id,
            device_type: device.device_type,
            user_agent: device.user_agent,
            refresh_token_hash,
            expires_at: now + lifespan,
            revoked: false,
            last_active_at: now,
        }
    }

    /// Check if session is expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Check if session is valid (not expired, not revoked).
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }

    pub fn token_reference(token_hash: impl Into<String>) -> Reference {
        Reference::single(REFRESH_TOKEN, token_hash)
    }

    pub fn account_partition(account_id: impl Into<String>) -> Partition {
        Partition::new(BY_ACCOUNT, "account_id", account_id)
    }
}

impl Entity for Session {
    const KIND: EntityKind = EntityKind::Session;

    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn references(&self) -> Vec<Reference> {
        vec![Self::token_reference(self.refresh_token_hash.as_str())]
    }

    fn partitions(&self) -> Vec<Partition> {
        vec![Self::account_partition(self.account_id.as_str())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(now: DateTime<Utc>) -> Session {
        Session::new(
            now,
            "acct".to_string(),
            DeviceInfo::default(),
            "hash".to_string(),
            Duration::hours(1),
        )
    }

    #[test]
    fn test_session_validity() {
        let now = Utc::now();
        let session = session(now);

        assert!(session.is_valid(now));
        assert!(!session.is_expired(now + Duration::minutes(59)));
        assert!(session.is_expired(now + Duration::hours(1)));
        assert!(!session.is_valid(now + Duration::hours(2)));
    }

    #[test]
    fn test_revoked_session_is_never_valid() {
        let now = Utc::now();
        let mut session = session(now);
        session.revoked = true;

        assert!(!session.is_valid(now));
        assert!(!session.is_expired(now));
    }

    #[test]
    fn test_session_keys() {
        let session = session(Utc::now());
        assert_eq!(session.references(), vec![Session::token_reference("hash")]);
        assert_eq!(session.partitions(), vec![Session::account_partition("acct")]);
    }
}
