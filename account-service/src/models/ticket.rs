//! One-time tickets: email verification codes, password-reset tokens and
//! email-change tokens.
//!
//! Each kind allows at most one ticket per account, keyed by `account_id`.
//! Only a SHA-256 of the token is kept.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{Entity, EntityKind, RecordHeader, Reference, ReferenceKind};

pub const TICKET_ACCOUNT: ReferenceKind = ReferenceKind {
    name: "account",
    columns: &["account_id"],
};

/// Behaviour shared by every ticket kind.
pub trait Ticket: Entity {
    fn account_id(&self) -> &str;

    fn token_hash(&self) -> &str;

    fn expires_at(&self) -> DateTime<Utc>;

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }

    /// Consumed tickets stay on record but can no longer be used.
    fn is_processed(&self) -> bool {
        false
    }

    /// A live ticket is handed back unchanged on repeat requests.
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_processed() && !self.is_expired(now)
    }

    fn account_reference(account_id: impl Into<String>) -> Reference {
        Reference::single(TICKET_ACCOUNT, account_id)
    }
}

/// Email verification code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct VerificationTicket {
    #[serde(flatten)]
    #[sqlx(flatten)]
    header: RecordHeader,
    pub account_id: String,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl VerificationTicket {
    pub fn new(now: DateTime<Utc>, account_id: String, code_hash: String, lifespan: Duration) -> Self {
        Self {
            header: RecordHeader::new(now),
            account_id,
            code_hash,
            expires_at: now + lifespan,
        }
    }
}

/// Password reset token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ResetPasswordTicket {
    #[serde(flatten)]
    #[sqlx(flatten)]
    header: RecordHeader,
    pub account_id: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl ResetPasswordTicket {
    pub fn new(now: DateTime<Utc>, account_id: String, token_hash: String, lifespan: Duration) -> Self {
        Self {
            header: RecordHeader::new(now),
            account_id,
            token_hash,
            expires_at: now + lifespan,
        }
    }
}

/// Email change request, confirmed through a token sent to `new_email`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct EmailChangeTicket {
    #[serde(flatten)]
    #[sqlx(flatten)]
    header: RecordHeader,
    pub account_id: String,
    pub new_email: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub processed: bool,
}

impl EmailChangeTicket {
    pub fn new(
        now: DateTime<Utc>,
        account_id: String,
        new_email: String,
        token_hash: String,
        lifespan: Duration,
    ) -> Self {
        Self {
            header: RecordHeader::new(now),
            account_id,
            new_email,
            token_hash,
            expires_at: now + lifespan,
            processed: false,
        }
    }
}

macro_rules! ticket_entity {
    ($ty:ty, $kind:expr, $hash:ident) => {
        ticket_entity!($ty, $kind, $hash, |_ticket: &$ty| false);
    };
    ($ty:ty, $kind:expr, $hash:ident, $processed:expr) => {
        impl Entity for $ty {
            const KIND: EntityKind = $kind;

            fn header(&self) -> &RecordHeader {
                &self.header
            }

            fn header_mut(&mut self) -> &mut RecordHeader {
                &mut self.header
            }

            fn references(&self) -> Vec<Reference> {
                vec![Reference::single(TICKET_ACCOUNT, self.account_id.as_str())]
            }
        }

        impl Ticket for $ty {
            fn account_id(&self) -> &str {
                &self.account_id
            }

            fn token_hash(&self) -> &str {
                &self.$hash
            }

            fn expires_at(&self) -> DateTime<Utc> {
                self.expires_at
            }

            fn is_processed(&self) -> bool {
                ($processed)(self)
            }
        }
    };
}

ticket_entity!(VerificationTicket, EntityKind::Verification, code_hash);
ticket_entity!(ResetPasswordTicket, EntityKind::ResetPassword, token_hash);
ticket_entity!(
    EmailChangeTicket,
    EntityKind::EmailChange,
    token_hash,
    |ticket: &EmailChangeTicket| ticket.processed
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_expiry() {
        let now = Utc::now();
        let ticket = ResetPasswordTicket::new(now, "acct".into(), "hash".into(), Duration::hours(1));

        assert!(ticket.is_live(now));
        assert!(!ticket.is_expired(now + Duration::minutes(30)));
        assert!(ticket.is_expired(now + Duration::hours(1)));
        assert!(!ticket.is_live(now + Duration::hours(2)));
    }

    #[test]
    fn test_processed_email_change_is_not_live() {
        let now = Utc::now();
        let mut ticket = EmailChangeTicket::new(
            now,
            "acct".into(),
            "new@example.com".into(),
            "hash".into(),
            Duration::hours(1),
        );
        assert!(ticket.is_live(now));

        ticket.processed = true;
        assert!(!ticket.is_live(now));
        assert!(!ticket.is_expired(now));
    }

    #[test]
    fn test_ticket_reference_is_account() {
        let ticket = VerificationTicket::new(Utc::now(), "acct".into(), "hash".into(), Duration::hours(1));
        assert_eq!(
            ticket.references(),
            vec![VerificationTicket::account_reference("acct")]
        );
        assert_eq!(Ticket::token_hash(&ticket), "hash");
    }
}
