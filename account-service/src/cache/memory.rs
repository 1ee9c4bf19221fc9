use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{CacheBatch, CacheError, CacheOp, CacheStore, RangeQuery, SortDirection};

#[derive(Debug, Clone)]
enum Value {
    Plain(String),
    Sorted(Vec<(String, f64)>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Instant,
}

/// In-process cache for tests and local runs.
///
/// Honours TTLs and applies batches under one lock. `set_unavailable(true)`
/// makes every call fail the way a dropped Redis connection would.
#[derive(Default)]
pub struct MemoryCache {
    slots: Mutex<HashMap<String, Slot>>,
    unavailable: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Whether a live (unexpired) key exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.slots
            .lock()
            .map(|slots| slots.get(key).is_some_and(|s| s.expires_at > Instant::now()))
            .unwrap_or(false)
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .slots
            .lock()
            .map(|slots| {
                slots
                    .iter()
                    .filter(|(_, s)| s.expires_at > now)
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Drop every key, as if the cache server restarted.
    pub fn flush(&self) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.clear();
        }
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Slot>>, CacheError> {
        self.slots
            .lock()
            .map_err(|e| CacheError::Unavailable(format!("Memory cache mutex poisoned: {}", e)))
    }
}

fn live<'a>(slots: &'a HashMap<String, Slot>, key: &str, now: Instant) -> Option<&'a Slot> {
    slots.get(key).filter(|s| s.expires_at > now)
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        let slots = self.lock()?;
        Ok(keys
            .iter()
            .map(|key| match live(&slots, key, now) {
                Some(Slot {
                    value: Value::Plain(v),
                    ..
                }) => Some(v.clone()),
                _ => None,
            })
            .collect())
    }

    async fn exists_many(&self, keys: &[String]) -> Result<Vec<bool>, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        let slots = self.lock()?;
        Ok(keys.iter().map(|key| live(&slots, key, now).is_some()).collect())
    }

    async fn apply(&self, batch: CacheBatch) -> Result<(), CacheError> {
        self.check_available()?;
        let now = Instant::now();
        let mut slots = self.lock()?;
        slots.retain(|_, s| s.expires_at > now);

        for op in batch.into_ops() {
            match op {
                CacheOp::Set {
                    key,
                    value,
                    ttl_secs,
                } => {
                    slots.insert(
                        key,
                        Slot {
                            value: Value::Plain(value),
                            expires_at: now + Duration::from_secs(ttl_secs),
                        },
                    );
                }
                CacheOp::Delete { key } => {
                    slots.remove(&key);
                }
                CacheOp::SortedAdd {
                    key,
                    member,
                    score,
                    ttl_secs,
                } => {
                    let slot = slots.entry(key).or_insert_with(|| Slot {
                        value: Value::Sorted(Vec::new()),
                        expires_at: now,
                    });
                    if let Value::Sorted(members) = &mut slot.value {
                        members.retain(|(m, _)| *m != member);
                        members.push((member, score));
                        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                    } else {
                        slot.value = Value::Sorted(vec![(member, score)]);
                    }
                    slot.expires_at = now + Duration::from_secs(ttl_secs);
                }
                CacheOp::SortedRemove { key, member } => {
                    let emptied = match slots.get_mut(&key) {
                        Some(Slot {
                            value: Value::Sorted(members),
                            ..
                        }) => {
                            members.retain(|(m, _)| *m != member);
                            members.is_empty()
                        }
                        _ => false,
                    };
                    // Redis drops empty sorted sets
                    if emptied {
                        slots.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    async fn range(&self, key: &str, query: &RangeQuery) -> Result<Vec<(String, f64)>, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        let slots = self.lock()?;
        let members = match live(&slots, key, now) {
            Some(Slot {
                value: Value::Sorted(members),
                ..
            }) => members.clone(),
            _ => return Ok(Vec::new()),
        };

        let page: Vec<(String, f64)> = match query.direction {
            SortDirection::Ascending => members
                .into_iter()
                .filter(|(_, score)| query.after.map_or(true, |after| *score > after))
                .take(query.limit)
                .collect(),
            SortDirection::Descending => members
                .into_iter()
                .rev()
                .filter(|(_, score)| query.after.map_or(true, |after| *score < after))
                .take(query.limit)
                .collect(),
        };
        Ok(page)
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(key: &str, member: &str, score: f64) -> CacheOp {
        CacheOp::SortedAdd {
            key: key.into(),
            member: member.into(),
            score,
            ttl_secs: 60,
        }
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCache::new();
        cache
            .apply(CacheBatch::from(vec![CacheOp::Set {
                key: "k".into(),
                value: "v".into(),
                ttl_secs: 60,
            }]))
            .await
            .unwrap();

        let values = cache.get_many(&["k".into(), "missing".into()]).await.unwrap();
        assert_eq!(values, vec![Some("v".to_string()), None]);

        cache
            .apply(CacheBatch::from(vec![CacheOp::Delete { key: "k".into() }]))
            .await
            .unwrap();
        assert!(!cache.contains_key("k"));
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_immediately() {
        let cache = MemoryCache::new();
        cache
            .apply(CacheBatch::from(vec![CacheOp::Set {
                key: "k".into(),
                value: "v".into(),
                ttl_secs: 0,
            }]))
            .await
            .unwrap();
        assert_eq!(cache.get_many(&["k".into()]).await.unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn test_sorted_range_both_directions() {
        let cache = MemoryCache::new();
        cache
            .apply(CacheBatch::from(vec![
                add("z", "b", 2.0),
                add("z", "a", 1.0),
                add("z", "c", 3.0),
            ]))
            .await
            .unwrap();

        let asc = cache
            .range(
                "z",
                &RangeQuery {
                    direction: SortDirection::Ascending,
                    after: Some(1.0),
                    limit: 10,
                },
            )
            .await
            .unwrap();
        assert_eq!(asc, vec![("b".to_string(), 2.0), ("c".to_string(), 3.0)]);

        let desc = cache
            .range(
                "z",
                &RangeQuery {
                    direction: SortDirection::Descending,
                    after: None,
                    limit: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(desc, vec![("c".to_string(), 3.0), ("b".to_string(), 2.0)]);
    }

    #[tokio::test]
    async fn test_removing_last_member_drops_set() {
        let cache = MemoryCache::new();
        cache.apply(CacheBatch::from(vec![add("z", "a", 1.0)])).await.unwrap();
        cache
            .apply(CacheBatch::from(vec![CacheOp::SortedRemove {
                key: "z".into(),
                member: "a".into(),
            }]))
            .await
            .unwrap();

        assert_eq!(cache.exists_many(&["z".into()]).await.unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn test_unavailable_cache_errors() {
        let cache = MemoryCache::new();
        cache.set_unavailable(true);

        assert!(matches!(
            cache.get_many(&["k".into()]).await,
            Err(CacheError::Unavailable(_))
        ));
        assert!(cache.health_check().await.is_err());
    }
}
