use std::sync::Arc;

use super::primary::{keyed_lookup, outcome};
use super::{CacheError, CacheLookup, CacheOp, CacheStore, CacheTtl, Keyspace};
use crate::models::Reference;
use crate::services::metrics::CACHE_LOOKUPS;

/// Secondary key to public id indirection (username, email, provider subject).
#[derive(Clone)]
pub struct ReferenceCache {
    cache: Arc<dyn CacheStore>,
    keys: Keyspace,
    ttl: CacheTtl,
    label: &'static str,
}

impl ReferenceCache {
    pub fn new(cache: Arc<dyn CacheStore>, keys: Keyspace, ttl: CacheTtl, label: &'static str) -> Self {
        Self {
            cache,
            keys,
            ttl,
            label,
        }
    }

    /// Public id the reference points at, if cached.
    pub async fn get(&self, reference: &Reference) -> Result<CacheLookup<String>, CacheError> {
        let lookup = keyed_lookup(
            self.cache.as_ref(),
            self.keys.reference(reference),
            self.keys.reference_blank(reference),
        )
        .await?;

        CACHE_LOOKUPS
            .with_label_values(&[self.label, outcome(&lookup)])
            .inc();
        Ok(lookup)
    }

    pub async fn set(&self, reference: &Reference, public_id: &str) -> Result<(), CacheError> {
        self.cache
            .apply(self.set_ops(reference, public_id).into())
            .await
    }

    pub async fn del(&self, reference: &Reference) -> Result<(), CacheError> {
        self.cache.apply(self.del_ops(reference).into()).await
    }

    pub async fn mark_blank(&self, reference: &Reference) -> Result<(), CacheError> {
        self.cache.apply(self.blank_ops(reference).into()).await
    }

    pub async fn is_blank(&self, reference: &Reference) -> Result<bool, CacheError> {
        let found = self
            .cache
            .exists_many(&[self.keys.reference_blank(reference)])
            .await?;
        Ok(found.first().copied().unwrap_or(false))
    }

    pub async fn clear_blank(&self, reference: &Reference) -> Result<(), CacheError> {
        self.cache
            .apply(self.clear_blank_ops(reference).into())
            .await
    }

    /// Move a mapping from `old` to `new` in one atomic batch.
    ///
    /// The old key ends up blank, so a lookup by the old value reports
    /// NotFound without a store round trip.
    pub async fn update_reference(
        &self,
        old: &Reference,
        new: &Reference,
        public_id: &str,
    ) -> Result<(), CacheError> {
        self.cache
            .apply(self.update_ops(old, new, public_id).into())
            .await
    }

    pub fn set_ops(&self, reference: &Reference, public_id: &str) -> Vec<CacheOp> {
        vec![
            CacheOp::Set {
                key: self.keys.reference(reference),
                value: public_id.to_string(),
                ttl_secs: self.ttl.entry_secs,
            },
            CacheOp::Delete {
                key: self.keys.reference_blank(reference),
            },
        ]
    }

    pub fn del_ops(&self, reference: &Reference) -> Vec<CacheOp> {
        vec![CacheOp::Delete {
            key: self.keys.reference(reference),
        }]
    }

    pub fn blank_ops(&self, reference: &Reference) -> Vec<CacheOp> {
        vec![
            CacheOp::Set {
                key: self.keys.reference_blank(reference),
                value: String::new(),
                ttl_secs: self.ttl.blank_secs,
            },
            CacheOp::Delete {
                key: self.keys.reference(reference),
            },
        ]
    }

    pub fn clear_blank_ops(&self, reference: &Reference) -> Vec<CacheOp> {
        vec![CacheOp::Delete {
            key: self.keys.reference_blank(reference),
        }]
    }

    pub fn update_ops(&self, old: &Reference, new: &Reference, public_id: &str) -> Vec<CacheOp> {
        let mut ops = self.blank_ops(old);
        ops.extend(self.set_ops(new, public_id));
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::models::{Account, EntityKind};

    fn references() -> (Arc<MemoryCache>, ReferenceCache) {
        let cache = Arc::new(MemoryCache::new());
        let references = ReferenceCache::new(
            cache.clone(),
            Keyspace::new("account", EntityKind::Account),
            CacheTtl::default(),
            "account",
        );
        (cache, references)
    }

    #[tokio::test]
    async fn test_set_clears_blank() {
        let (_cache, references) = references();
        let alice = Account::username_reference("alice");

        references.mark_blank(&alice).await.unwrap();
        assert_eq!(references.get(&alice).await.unwrap(), CacheLookup::Blank);

        references.set(&alice, "id1").await.unwrap();
        assert_eq!(
            references.get(&alice).await.unwrap(),
            CacheLookup::Hit {
                value: "id1".to_string(),
                stale_blank: false
            }
        );
        assert!(!references.is_blank(&alice).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_reference_moves_mapping() {
        let (cache, references) = references();
        let old = Account::username_reference("alice");
        let new = Account::username_reference("alicia");
        references.set(&old, "id1").await.unwrap();

        references.update_reference(&old, &new, "id1").await.unwrap();

        assert_eq!(references.get(&old).await.unwrap(), CacheLookup::Blank);
        assert_eq!(
            references.get(&new).await.unwrap(),
            CacheLookup::Hit {
                value: "id1".to_string(),
                stale_blank: false
            }
        );
        assert!(!cache.contains_key("account:username:alice"));
    }

    #[tokio::test]
    async fn test_del_leaves_plain_miss() {
        let (_cache, references) = references();
        let alice = Account::username_reference("alice");
        references.set(&alice, "id1").await.unwrap();

        references.del(&alice).await.unwrap();
        assert_eq!(references.get(&alice).await.unwrap(), CacheLookup::Miss);

        references.mark_blank(&alice).await.unwrap();
        references.clear_blank(&alice).await.unwrap();
        assert_eq!(references.get(&alice).await.unwrap(), CacheLookup::Miss);
    }
}
