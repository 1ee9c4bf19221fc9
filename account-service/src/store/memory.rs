use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{Lookup, RecordStore, SessionStore, StoreError};
use crate::models::{Entity, Partition, Session};

struct Rows<E> {
    by_id: BTreeMap<i64, E>,
    next_id: i64,
}

/// In-memory store for tests.
///
/// Enforces public id and reference uniqueness like the real schema and
/// counts calls, so tests can prove a path never reached the store.
pub struct MemoryStore<E> {
    rows: Mutex<Rows<E>>,
    calls: AtomicUsize,
    find_calls: AtomicUsize,
    failing: AtomicBool,
}

impl<E: Entity> Default for MemoryStore<E> {
    fn default() -> Self {
        Self {
            rows: Mutex::new(Rows {
                by_id: BTreeMap::new(),
                next_id: 1,
            }),
            calls: AtomicUsize::new(0),
            find_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }
}

impl<E: Entity> MemoryStore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total calls of any kind.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls to `find` only.
    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    /// Make every following call fail with a database error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().map(|rows| rows.by_id.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a row behind the caches' back.
    pub fn put(&self, entity: &E) -> Result<E, StoreError> {
        let mut rows = self.lock()?;
        insert_row(&mut rows, entity)
    }

    fn begin(&self) -> Result<MutexGuard<'_, Rows<E>>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        self.lock()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Rows<E>>, StoreError> {
        self.rows.lock().map_err(|e| {
            StoreError::Database(sqlx::Error::Protocol(format!(
                "Memory store mutex poisoned: {}",
                e
            )))
        })
    }
}

fn conflicting<E: Entity>(rows: &Rows<E>, entity: &E) -> Option<String> {
    let id = entity.header().system_id();
    let references = entity.references();
    rows.by_id
        .values()
        .filter(|row| row.header().system_id() != id)
        .find_map(|row| {
            if row.public_id() == entity.public_id() {
                return Some("public_id".to_string());
            }
            row.references()
                .iter()
                .find(|r| references.contains(r))
                .map(|r| r.kind.name.to_string())
        })
}

fn insert_row<E: Entity>(rows: &mut Rows<E>, entity: &E) -> Result<E, StoreError> {
    if let Some(key) = conflicting(rows, entity) {
        return Err(StoreError::Conflict(format!("duplicate {}", key)));
    }
    let mut row = entity.clone();
    row.header_mut().assign_system_id(rows.next_id);
    rows.by_id.insert(rows.next_id, row.clone());
    rows.next_id += 1;
    Ok(row)
}

fn sorted<E: Entity>(mut rows: Vec<E>) -> Vec<E> {
    rows.sort_by_key(|row| (row.header().created_at(), row.header().system_id()));
    rows
}

#[async_trait]
impl<E: Entity> RecordStore<E> for MemoryStore<E> {
    async fn insert(&self, entity: &E) -> Result<E, StoreError> {
        let mut rows = self.begin()?;
        insert_row(&mut rows, entity)
    }

    async fn update(&self, entity: &E) -> Result<E, StoreError> {
        let mut rows = self.begin()?;
        let id = entity.header().system_id();
        if !rows.by_id.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        if let Some(key) = conflicting(&rows, entity) {
            return Err(StoreError::Conflict(format!("duplicate {}", key)));
        }
        rows.by_id.insert(id, entity.clone());
        Ok(entity.clone())
    }

    async fn delete(&self, entity: &E) -> Result<(), StoreError> {
        let mut rows = self.begin()?;
        rows.by_id
            .remove(&entity.header().system_id())
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn find(&self, lookup: &Lookup) -> Result<E, StoreError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        let rows = self.begin()?;
        rows.by_id
            .values()
            .find(|row| match lookup {
                Lookup::PublicId(id) => row.public_id() == id,
                Lookup::Reference(reference) => row.references().contains(reference),
            })
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_partition(&self, partition: Option<&Partition>) -> Result<Vec<E>, StoreError> {
        let rows = self.begin()?;
        let matching = rows
            .by_id
            .values()
            .filter(|row| partition.map_or(true, |p| row.partitions().contains(p)))
            .cloned()
            .collect();
        Ok(sorted(matching))
    }

    async fn scan(&self, after_id: i64, limit: i64) -> Result<Vec<E>, StoreError> {
        let rows = self.begin()?;
        Ok(rows
            .by_id
            .range(after_id.saturating_add(1)..)
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.begin().map(|_| ())
    }
}

#[async_trait]
impl SessionStore for MemoryStore<Session> {
    async fn purge_invalid(&self, now: DateTime<Utc>) -> Result<Vec<Session>, StoreError> {
        let mut rows = self.begin()?;
        let doomed: Vec<i64> = rows
            .by_id
            .iter()
            .filter(|(_, s)| s.revoked && s.is_expired(now))
            .map(|(id, _)| *id)
            .collect();
        Ok(doomed
            .into_iter()
            .filter_map(|id| rows.by_id.remove(&id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Account;

    fn account(username: &str) -> Account {
        Account::new(Utc::now(), username.to_string(), Some(username.to_string()), None)
    }

    #[tokio::test]
    async fn test_insert_assigns_system_ids() {
        let store = MemoryStore::<Account>::new();
        let first = store.insert(&account("alice")).await.unwrap();
        let second = store.insert(&account("bob")).await.unwrap();

        assert_eq!(first.header().system_id(), 1);
        assert_eq!(second.header().system_id(), 2);
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_reference_conflicts() {
        let store = MemoryStore::<Account>::new();
        store.insert(&account("alice")).await.unwrap();

        assert!(matches!(
            store.insert(&account("alice")).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_reference_and_scan() {
        let store = MemoryStore::<Account>::new();
        for name in ["a", "b", "c"] {
            store.insert(&account(name)).await.unwrap();
        }

        let b = store
            .find(&Lookup::Reference(Account::username_reference("b")))
            .await
            .unwrap();
        assert_eq!(b.username.as_deref(), Some("b"));
        assert_eq!(store.find_calls(), 1);

        let page = store.scan(1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].header().system_id(), 2);
    }

    #[tokio::test]
    async fn test_failing_store() {
        let store = MemoryStore::<Account>::new();
        store.set_failing(true);
        assert!(matches!(
            store.insert(&account("alice")).await,
            Err(StoreError::Database(_))
        ));
    }
}
