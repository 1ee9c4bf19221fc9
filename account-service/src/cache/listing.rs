use std::sync::Arc;

use super::{CacheError, CacheLookup, CacheOp, CacheStore, CacheTtl, Keyspace, PrimaryCache, RangeQuery};
use crate::models::{Entity, Partition};

/// Result of reading a listing page from cache.
#[derive(Debug, Clone, PartialEq)]
pub enum ListingFetch<E> {
    /// Resolved page. `next_cursor` is set when more members follow.
    Page {
        items: Vec<E>,
        next_cursor: Option<f64>,
    },
    /// The listing is confirmed empty.
    Empty,
    /// Listing (or one of its members) is not cached; seed from the store.
    Cold,
}

/// Sorted sets of public ids, one per listing.
///
/// Every entity belongs to its kind's global listing plus one listing per
/// partition it declares. A listing is either warm (the set exists),
/// confirmed empty (blank page marker) or cold (neither).
#[derive(Clone)]
pub struct ListingCache {
    cache: Arc<dyn CacheStore>,
    keys: Keyspace,
    ttl: CacheTtl,
}

impl ListingCache {
    pub fn new(cache: Arc<dyn CacheStore>, keys: Keyspace, ttl: CacheTtl) -> Self {
        Self { cache, keys, ttl }
    }

    /// Ops adding `public_id` to the global listing and each partition.
    ///
    /// Cold listings are left alone so a later fetch seeds them whole.
    pub async fn add_ops(
        &self,
        partitions: &[Partition],
        public_id: &str,
        score: f64,
    ) -> Result<Vec<CacheOp>, CacheError> {
        let scopes = scopes(partitions);
        let mut probe = Vec::with_capacity(scopes.len() * 2);
        for scope in &scopes {
            probe.push(self.keys.listing(*scope));
            probe.push(self.keys.listing_blank(*scope));
        }
        let found = self.cache.exists_many(&probe).await?;

        let mut ops = Vec::new();
        for (scope, state) in scopes.iter().zip(found.chunks(2)) {
            let warm = state.first().copied().unwrap_or(false);
            let blank = state.get(1).copied().unwrap_or(false);
            if !warm && !blank {
                continue;
            }
            if blank {
                ops.push(CacheOp::Delete {
                    key: self.keys.listing_blank(*scope),
                });
            }
            ops.push(CacheOp::SortedAdd {
                key: self.keys.listing(*scope),
                member: public_id.to_string(),
                score,
                ttl_secs: self.ttl.listing_secs,
            });
        }
        Ok(ops)
    }

    pub fn remove_ops(&self, partitions: &[Partition], public_id: &str) -> Vec<CacheOp> {
        scopes(partitions)
            .into_iter()
            .map(|scope| CacheOp::SortedRemove {
                key: self.keys.listing(scope),
                member: public_id.to_string(),
            })
            .collect()
    }

    /// Add members without touching what is already there.
    pub fn fill_ops(&self, partition: Option<&Partition>, members: &[(String, f64)]) -> Vec<CacheOp> {
        let mut ops = Vec::with_capacity(members.len() + 1);
        if members.is_empty() {
            return ops;
        }
        ops.push(CacheOp::Delete {
            key: self.keys.listing_blank(partition),
        });
        ops.extend(members.iter().map(|(member, score)| CacheOp::SortedAdd {
            key: self.keys.listing(partition),
            member: member.clone(),
            score: *score,
            ttl_secs: self.ttl.listing_secs,
        }));
        ops
    }

    /// Replace a listing with exactly `members`; an empty set is marked blank.
    pub fn replace_ops(&self, partition: Option<&Partition>, members: &[(String, f64)]) -> Vec<CacheOp> {
        let mut ops = vec![CacheOp::Delete {
            key: self.keys.listing(partition),
        }];
        if members.is_empty() {
            ops.extend(self.blank_page_ops(partition));
        } else {
            ops.extend(self.fill_ops(partition, members));
        }
        ops
    }

    pub fn blank_page_ops(&self, partition: Option<&Partition>) -> Vec<CacheOp> {
        vec![
            CacheOp::Set {
                key: self.keys.listing_blank(partition),
                value: String::new(),
                ttl_secs: self.ttl.blank_secs,
            },
            CacheOp::Delete {
                key: self.keys.listing(partition),
            },
        ]
    }

    pub async fn mark_blank_page(&self, partition: Option<&Partition>) -> Result<(), CacheError> {
        self.cache
            .apply(self.blank_page_ops(partition).into())
            .await
    }

    pub async fn is_blank_page(&self, partition: Option<&Partition>) -> Result<bool, CacheError> {
        let found = self
            .cache
            .exists_many(&[self.keys.listing_blank(partition)])
            .await?;
        Ok(found.first().copied().unwrap_or(false))
    }

    /// Read one page and resolve its ids through the primary cache.
    ///
    /// Blank members are dropped; a member missing from the primary cache
    /// makes the whole page cold.
    pub async fn fetch<E: Entity>(
        &self,
        primary: &PrimaryCache<E>,
        partition: Option<&Partition>,
        query: &RangeQuery,
    ) -> Result<ListingFetch<E>, CacheError> {
        let key = self.keys.listing(partition);
        let probe = RangeQuery {
            limit: query.limit.saturating_add(1),
            ..*query
        };
        let mut members = self.cache.range(&key, &probe).await?;

        if members.is_empty() {
            let found = self
                .cache
                .exists_many(&[key, self.keys.listing_blank(partition)])
                .await?;
            return Ok(match found.as_slice() {
                [true, _] => ListingFetch::Page {
                    items: Vec::new(),
                    next_cursor: None,
                },
                [false, true] => ListingFetch::Empty,
                _ => ListingFetch::Cold,
            });
        }

        let has_more = members.len() > query.limit;
        members.truncate(query.limit);
        let next_cursor = if has_more {
            members.last().map(|(_, score)| *score)
        } else {
            None
        };

        let ids: Vec<String> = members.into_iter().map(|(id, _)| id).collect();
        let mut items = Vec::with_capacity(ids.len());
        for lookup in primary.get_many(&ids).await? {
            match lookup {
                CacheLookup::Hit { value, .. } => items.push(value),
                CacheLookup::Blank => {}
                CacheLookup::Miss => return Ok(ListingFetch::Cold),
            }
        }

        Ok(ListingFetch::Page { items, next_cursor })
    }
}

/// The global listing followed by each partition.
fn scopes(partitions: &[Partition]) -> Vec<Option<&Partition>> {
    std::iter::once(None)
        .chain(partitions.iter().map(Some))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBatch, MemoryCache, SortDirection};
    use crate::models::{DeviceInfo, EntityKind, Session};
    use chrono::{Duration, Utc};

    struct Fixture {
        cache: Arc<MemoryCache>,
        primary: PrimaryCache<Session>,
        listing: ListingCache,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(MemoryCache::new());
        let keys = Keyspace::new("account", EntityKind::Session);
        Fixture {
            primary: PrimaryCache::new(cache.clone(), keys.clone(), CacheTtl::default()),
            listing: ListingCache::new(cache.clone(), keys, CacheTtl::default()),
            cache,
        }
    }

    fn session(offset_secs: i64) -> Session {
        Session::new(
            Utc::now() + Duration::seconds(offset_secs),
            "acct".to_string(),
            DeviceInfo::default(),
            format!("hash{}", offset_secs),
            Duration::hours(1),
        )
    }

    fn ascending(after: Option<f64>, limit: usize) -> RangeQuery {
        RangeQuery {
            direction: SortDirection::Ascending,
            after,
            limit,
        }
    }

    async fn apply(fixture: &Fixture, ops: Vec<CacheOp>) {
        fixture.cache.apply(CacheBatch::from(ops)).await.unwrap();
    }

    #[tokio::test]
    async fn test_cold_listing_stays_cold() {
        let f = fixture();
        let s = session(0);

        let ops = f
            .listing
            .add_ops(&s.partitions(), s.public_id(), s.listing_score() as f64)
            .await
            .unwrap();
        assert!(ops.is_empty());
        assert_eq!(
            f.listing.fetch(&f.primary, None, &ascending(None, 10)).await.unwrap(),
            ListingFetch::Cold
        );
    }

    #[tokio::test]
    async fn test_blank_page_then_add() {
        let f = fixture();
        let partition = Session::account_partition("acct");
        f.listing.mark_blank_page(Some(&partition)).await.unwrap();
        assert!(f.listing.is_blank_page(Some(&partition)).await.unwrap());
        assert_eq!(
            f.listing
                .fetch(&f.primary, Some(&partition), &ascending(None, 10))
                .await
                .unwrap(),
            ListingFetch::Empty
        );

        let s = session(0);
        f.primary.set(&s).await.unwrap();
        let ops = f
            .listing
            .add_ops(&s.partitions(), s.public_id(), s.listing_score() as f64)
            .await
            .unwrap();
        apply(&f, ops).await;

        assert!(!f.listing.is_blank_page(Some(&partition)).await.unwrap());
        match f
            .listing
            .fetch(&f.primary, Some(&partition), &ascending(None, 10))
            .await
            .unwrap()
        {
            ListingFetch::Page { items, next_cursor } => {
                assert_eq!(items, vec![s]);
                assert_eq!(next_cursor, None);
            }
            other => panic!("unexpected fetch result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pagination_and_member_resolution() {
        let f = fixture();
        let sessions: Vec<Session> = (0..3).map(session).collect();
        let members: Vec<(String, f64)> = sessions
            .iter()
            .map(|s| (s.public_id().to_string(), s.listing_score() as f64))
            .collect();
        for s in &sessions {
            f.primary.set(s).await.unwrap();
        }
        apply(&f, f.listing.replace_ops(None, &members)).await;

        let first = f.listing.fetch(&f.primary, None, &ascending(None, 2)).await.unwrap();
        let cursor = match first {
            ListingFetch::Page { items, next_cursor } => {
                assert_eq!(items, sessions[..2].to_vec());
                next_cursor.unwrap()
            }
            other => panic!("unexpected fetch result: {:?}", other),
        };

        let second = f
            .listing
            .fetch(&f.primary, None, &ascending(Some(cursor), 2))
            .await
            .unwrap();
        assert_eq!(
            second,
            ListingFetch::Page {
                items: vec![sessions[2].clone()],
                next_cursor: None
            }
        );

        // blank members drop out, missing members force a seed
        f.primary.mark_blank(sessions[0].public_id()).await.unwrap();
        match f.listing.fetch(&f.primary, None, &ascending(None, 2)).await.unwrap() {
            ListingFetch::Page { items, .. } => assert_eq!(items, vec![sessions[1].clone()]),
            other => panic!("unexpected fetch result: {:?}", other),
        }

        f.primary.clear_blank(sessions[0].public_id()).await.unwrap();
        assert_eq!(
            f.listing.fetch(&f.primary, None, &ascending(None, 2)).await.unwrap(),
            ListingFetch::Cold
        );
    }

    #[tokio::test]
    async fn test_replace_with_nothing_marks_blank() {
        let f = fixture();
        apply(&f, f.listing.replace_ops(None, &[])).await;
        assert!(f.listing.is_blank_page(None).await.unwrap());
    }
}
