//! Account model - the user record every other entity hangs off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{Entity, EntityKind, RecordHeader, Reference, ReferenceKind};

pub const USERNAME: ReferenceKind = ReferenceKind {
    name: "username",
    columns: &["username"],
};

pub const EMAIL: ReferenceKind = ReferenceKind {
    name: "email",
    columns: &["email"],
};

/// Account entity.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    #[serde(flatten)]
    #[sqlx(flatten)]
    header: RecordHeader,
    pub name: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
    pub password_hash: Option<String>,
    pub email_verified: bool,
    pub suspended: bool,
}

impl Account {
    /// Create a new, unverified account without a password.
    pub fn new(
        now: DateTime<Utc>,
        name: String,
        username: Option<String>,
        email: Option<String>,
    ) -> Self {
        Self {
            header: RecordHeader::new(now),
            name,
            username,
            email,
            avatar: None,
            password_hash: None,
            email_verified: false,
            suspended: false,
        }
    }

    /// Check if the account may authenticate.
    pub fn is_active(&self) -> bool {
        !self.suspended
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn username_reference(username: impl Into<String>) -> Reference {
        Reference::single(USERNAME, username)
    }

    pub fn email_reference(email: impl Into<String>) -> Reference {
        Reference::single(EMAIL, email)
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("public_id", &self.header.public_id())
            .field("name", &self.name)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("email_verified", &self.email_verified)
            .field("suspended", &self.suspended)
            .finish_non_exhaustive()
    }
}

impl Entity for Account {
    const KIND: EntityKind = EntityKind::Account;

    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn references(&self) -> Vec<Reference> {
        let mut refs = Vec::with_capacity(2);
        if let Some(username) = &self.username {
            refs.push(Self::username_reference(username.as_str()));
        }
        if let Some(email) = &self.email {
            refs.push(Self::email_reference(email.as_str()));
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_follow_optional_fields() {
        let now = Utc::now();
        let mut account = Account::new(now, "Alice".into(), Some("alice".into()), None);
        assert_eq!(account.references(), vec![Account::username_reference("alice")]);

        account.email = Some("alice@example.com".into());
        assert_eq!(account.references().len(), 2);

        account.username = None;
        assert_eq!(
            account.references(),
            vec![Account::email_reference("alice@example.com")]
        );
    }

    #[test]
    fn test_debug_hides_password_hash() {
        let mut account = Account::new(Utc::now(), "Alice".into(), Some("alice".into()), None);
        account.password_hash = Some("$argon2id$secret".into());

        let rendered = format!("{:?}", account);
        assert!(!rendered.contains("argon2id"));
        assert!(rendered.contains("alice"));
    }
}
