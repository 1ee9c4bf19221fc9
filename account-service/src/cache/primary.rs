use std::marker::PhantomData;
use std::sync::Arc;

use super::{CacheError, CacheLookup, CacheOp, CacheStore, CacheTtl, Keyspace};
use crate::models::Entity;
use crate::services::metrics::CACHE_LOOKUPS;

/// Entity cache keyed by public id, with blank markers for confirmed-absent ids.
///
/// An entry and its blank marker never coexist: every op that writes one
/// deletes the other in the same batch.
pub struct PrimaryCache<E> {
    cache: Arc<dyn CacheStore>,
    keys: Keyspace,
    ttl: CacheTtl,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for PrimaryCache<E> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            keys: self.keys.clone(),
            ttl: self.ttl,
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> PrimaryCache<E> {
    pub fn new(cache: Arc<dyn CacheStore>, keys: Keyspace, ttl: CacheTtl) -> Self {
        Self {
            cache,
            keys,
            ttl,
            _entity: PhantomData,
        }
    }

    pub fn keys(&self) -> &Keyspace {
        &self.keys
    }

    /// Read the entry and its blank marker in one round trip.
    pub async fn get(&self, public_id: &str) -> Result<CacheLookup<E>, CacheError> {
        let lookup = keyed_lookup(
            self.cache.as_ref(),
            self.keys.entry(public_id),
            self.keys.entry_blank(public_id),
        )
        .await?;

        let lookup = match lookup {
            CacheLookup::Hit { value, stale_blank } => match serde_json::from_str::<E>(&value) {
                Ok(entity) => CacheLookup::Hit {
                    value: entity,
                    stale_blank,
                },
                Err(e) => {
                    tracing::warn!(
                        entity = E::KIND.as_str(),
                        public_id,
                        "Discarding unreadable cache entry: {}",
                        e
                    );
                    CacheLookup::Miss
                }
            },
            CacheLookup::Blank => CacheLookup::Blank,
            CacheLookup::Miss => CacheLookup::Miss,
        };

        CACHE_LOOKUPS
            .with_label_values(&[E::KIND.as_str(), outcome(&lookup)])
            .inc();
        Ok(lookup)
    }

    pub async fn set(&self, entity: &E) -> Result<(), CacheError> {
        self.cache.apply(self.set_ops(entity)?.into()).await
    }

    pub async fn del(&self, public_id: &str) -> Result<(), CacheError> {
        self.cache.apply(self.del_ops(public_id).into()).await
    }

    pub async fn mark_blank(&self, public_id: &str) -> Result<(), CacheError> {
        self.cache.apply(self.blank_ops(public_id).into()).await
    }

    pub async fn is_blank(&self, public_id: &str) -> Result<bool, CacheError> {
        let found = self
            .cache
            .exists_many(&[self.keys.entry_blank(public_id)])
            .await?;
        Ok(found.first().copied().unwrap_or(false))
    }

    pub async fn clear_blank(&self, public_id: &str) -> Result<(), CacheError> {
        self.cache
            .apply(self.clear_blank_ops(public_id).into())
            .await
    }

    /// Write the entry and drop any blank marker.
    pub fn set_ops(&self, entity: &E) -> Result<Vec<CacheOp>, CacheError> {
        let value = serde_json::to_string(entity)?;
        Ok(vec![
            CacheOp::Set {
                key: self.keys.entry(entity.public_id()),
                value,
                ttl_secs: self.ttl.entry_secs,
            },
            CacheOp::Delete {
                key: self.keys.entry_blank(entity.public_id()),
            },
        ])
    }

    pub fn del_ops(&self, public_id: &str) -> Vec<CacheOp> {
        vec![CacheOp::Delete {
            key: self.keys.entry(public_id),
        }]
    }

    /// Replace the entry (if any) with a blank marker.
    pub fn blank_ops(&self, public_id: &str) -> Vec<CacheOp> {
        vec![
            CacheOp::Set {
                key: self.keys.entry_blank(public_id),
                value: String::new(),
                ttl_secs: self.ttl.blank_secs,
            },
            CacheOp::Delete {
                key: self.keys.entry(public_id),
            },
        ]
    }

    pub fn clear_blank_ops(&self, public_id: &str) -> Vec<CacheOp> {
        vec![CacheOp::Delete {
            key: self.keys.entry_blank(public_id),
        }]
    }

    /// Resolve many ids in one round trip, preserving order.
    pub async fn get_many(&self, public_ids: &[String]) -> Result<Vec<CacheLookup<E>>, CacheError> {
        if public_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::with_capacity(public_ids.len() * 2);
        for id in public_ids {
            keys.push(self.keys.entry(id));
            keys.push(self.keys.entry_blank(id));
        }
        let values = self.cache.get_many(&keys).await?;

        let lookups = values
            .chunks(2)
            .zip(public_ids)
            .map(|(pair, id)| {
                let entry = pair.first().cloned().flatten();
                let blank = pair.get(1).is_some_and(|b| b.is_some());
                match entry {
                    Some(raw) => match serde_json::from_str::<E>(&raw) {
                        Ok(value) => CacheLookup::Hit {
                            value,
                            stale_blank: blank,
                        },
                        Err(e) => {
                            tracing::warn!(
                                entity = E::KIND.as_str(),
                                public_id = %id,
                                "Discarding unreadable cache entry: {}",
                                e
                            );
                            CacheLookup::Miss
                        }
                    },
                    None if blank => CacheLookup::Blank,
                    None => CacheLookup::Miss,
                }
            })
            .collect();
        Ok(lookups)
    }
}

/// One MGET over a value key and its blank marker.
pub(super) async fn keyed_lookup(
    cache: &dyn CacheStore,
    key: String,
    blank_key: String,
) -> Result<CacheLookup<String>, CacheError> {
    let values = cache.get_many(&[key, blank_key]).await?;
    let mut values = values.into_iter();
    let entry = values.next().flatten();
    let blank = values.next().flatten().is_some();

    Ok(match entry {
        Some(value) => CacheLookup::Hit {
            value,
            stale_blank: blank,
        },
        None if blank => CacheLookup::Blank,
        None => CacheLookup::Miss,
    })
}

pub(super) fn outcome<T>(lookup: &CacheLookup<T>) -> &'static str {
    match lookup {
        CacheLookup::Hit { .. } => "hit",
        CacheLookup::Blank => "blank",
        CacheLookup::Miss => "miss",
    }
}
