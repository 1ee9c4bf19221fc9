//! Cache key templates.
//!
//! ```text
//! <prefix>:<publicID>                      account entry
//! <prefix>:username:<username>             account reference
//! <prefix>:session:<publicID>              session entry
//! <prefix>:session:account:<accountID>     sessions of one account (sorted set)
//! <prefix>:session:list:all                every session (sorted set)
//! <ns>:blank:<rest>                        blank marker for <ns>:<rest>
//! ```
//!
//! Public ids are escaped so they never contain `:`, while every other
//! suffix does. Entry keys can't alias a listing, reference or blank key
//! whatever id a caller supplies.

use crate::models::{EntityKind, Partition, Reference};

const LISTING: &str = "list:all";
const BLANK: &str = "blank";

/// Key builder for one entity kind under the configured prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    namespace: String,
}

impl Keyspace {
    pub fn new(prefix: &str, kind: EntityKind) -> Self {
        let namespace = match kind.key_segment() {
            Some(segment) => format!("{}:{}", prefix, segment),
            None => prefix.to_string(),
        };
        Self { namespace }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn entry(&self, public_id: &str) -> String {
        self.key(&escape(public_id))
    }

    pub fn entry_blank(&self, public_id: &str) -> String {
        self.blank(&escape(public_id))
    }

    pub fn reference(&self, reference: &Reference) -> String {
        self.key(&reference_suffix(reference))
    }

    pub fn reference_blank(&self, reference: &Reference) -> String {
        self.blank(&reference_suffix(reference))
    }

    pub fn listing(&self, partition: Option<&Partition>) -> String {
        self.key(&listing_suffix(partition))
    }

    pub fn listing_blank(&self, partition: Option<&Partition>) -> String {
        self.blank(&listing_suffix(partition))
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.namespace, suffix)
    }

    fn blank(&self, suffix: &str) -> String {
        format!("{}:{}:{}", self.namespace, BLANK, suffix)
    }
}

fn reference_suffix(reference: &Reference) -> String {
    let mut suffix = reference.kind.name.to_string();
    for value in &reference.values {
        suffix.push(':');
        suffix.push_str(&escape(value));
    }
    suffix
}

fn listing_suffix(partition: Option<&Partition>) -> String {
    match partition {
        Some(p) => format!("{}:{}", p.name, escape(&p.value)),
        None => LISTING.to_string(),
    }
}

/// Keep caller-supplied values from introducing extra key segments.
fn escape(value: &str) -> String {
    if !value.contains([':', '%']) {
        return value.to_string();
    }
    value.replace('%', "%25").replace(':', "%3A")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, Provider, Session};

    #[test]
    fn test_account_keys_live_under_prefix() {
        let keys = Keyspace::new("account", EntityKind::Account);

        assert_eq!(keys.entry("abc"), "account:abc");
        assert_eq!(keys.entry_blank("abc"), "account:blank:abc");
        assert_eq!(
            keys.reference(&Account::username_reference("alice")),
            "account:username:alice"
        );
        assert_eq!(
            keys.reference_blank(&Account::username_reference("alice")),
            "account:blank:username:alice"
        );
        assert_eq!(keys.listing(None), "account:list:all");
    }

    #[test]
    fn test_session_keys() {
        let keys = Keyspace::new("account", EntityKind::Session);

        assert_eq!(keys.entry("abc"), "account:session:abc");
        assert_eq!(
            keys.listing(Some(&Session::account_partition("acct1"))),
            "account:session:account:acct1"
        );
        assert_eq!(
            keys.listing_blank(Some(&Session::account_partition("acct1"))),
            "account:session:blank:account:acct1"
        );
    }

    #[test]
    fn test_entry_keys_never_alias_other_keys() {
        let keys = Keyspace::new("account", EntityKind::Session);
        let partition = Session::account_partition("acct1");

        for id in ["list", "list:all", "blank", "account", "account:acct1", "%3A"] {
            let entry = keys.entry(id);
            let entry_blank = keys.entry_blank(id);
            for other in [
                keys.listing(None),
                keys.listing(Some(&partition)),
                keys.listing_blank(None),
                keys.listing_blank(Some(&partition)),
            ] {
                assert_ne!(entry, other, "id {:?}", id);
                assert_ne!(entry_blank, other, "id {:?}", id);
            }
        }
        assert_eq!(keys.entry("list:all"), "account:session:list%3Aall");
    }

    #[test]
    fn test_composite_reference_values_are_escaped() {
        let keys = Keyspace::new("app", EntityKind::Provider);
        let reference = Provider::subject_reference("a:b", "https://issuer");

        assert_eq!(
            keys.reference(&reference),
            "app:provider:sub:a%3Ab:https%3A//issuer"
        );
        assert_ne!(
            keys.reference(&Provider::subject_reference("a", "b:https://issuer")),
            keys.reference(&reference)
        );
    }
}
