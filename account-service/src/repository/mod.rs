//! Generic repository: the store plus the three caches, kept coherent.
//!
//! Reads are cache-only and answer `SeedRequired` on a miss; `seed` is the
//! store-backed repair path. Writes hit the store first, then ship every
//! cache change for that write as one atomic batch. A cache failure after
//! the store committed is logged and counted, never returned.

mod query;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::cache::{
    CacheBatch, CacheError, CacheLookup, CacheOp, CacheStore, CacheTtl, Keyspace, ListingCache,
    ListingFetch, PrimaryCache, RangeQuery, ReferenceCache,
};
use crate::clock::Clock;
use crate::models::{Entity, Partition, Reference};
use crate::services::metrics::CACHE_WRITE_FAILURES;
use crate::store::{Lookup, RecordStore, StoreError};

pub use query::{ListQuery, Page};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Not found")]
    NotFound,

    #[error("Not cached; seed from the store")]
    SeedRequired,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl From<StoreError> for RepositoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => RepositoryError::NotFound,
            StoreError::Conflict(msg) => RepositoryError::Conflict(msg),
            other => RepositoryError::Store(other),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Tuning shared by every repository.
#[derive(Debug, Clone, Copy)]
pub struct RepositoryOptions {
    pub ttl: CacheTtl,
    /// Upper bound on any single store or cache call.
    pub operation_timeout: Duration,
    /// Rows per chunk when warming the cache from the store.
    pub seed_batch_size: i64,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            ttl: CacheTtl::default(),
            operation_timeout: Duration::from_secs(5),
            seed_batch_size: 500,
        }
    }
}

pub struct Repository<E: Entity> {
    store: Arc<dyn RecordStore<E>>,
    cache: Arc<dyn CacheStore>,
    primary: PrimaryCache<E>,
    references: ReferenceCache,
    listing: ListingCache,
    clock: Arc<dyn Clock>,
    options: RepositoryOptions,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: self.cache.clone(),
            primary: self.primary.clone(),
            references: self.references.clone(),
            listing: self.listing.clone(),
            clock: self.clock.clone(),
            options: self.options,
        }
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(
        prefix: &str,
        store: Arc<dyn RecordStore<E>>,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        options: RepositoryOptions,
    ) -> Self {
        let keys = Keyspace::new(prefix, E::KIND);
        Self {
            primary: PrimaryCache::new(cache.clone(), keys.clone(), options.ttl),
            references: ReferenceCache::new(cache.clone(), keys.clone(), options.ttl, E::KIND.as_str()),
            listing: ListingCache::new(cache.clone(), keys, options.ttl),
            store,
            cache,
            clock,
            options,
        }
    }

    pub fn primary(&self) -> &PrimaryCache<E> {
        &self.primary
    }

    pub fn references(&self) -> &ReferenceCache {
        &self.references
    }

    pub fn listing(&self) -> &ListingCache {
        &self.listing
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ==================== Writes ====================

    /// Insert into the store, then cache the row, its references and its
    /// listing memberships.
    #[instrument(skip(self, entity), fields(kind = E::KIND.as_str(), public_id = %entity.public_id()))]
    pub async fn create(&self, entity: &E) -> RepositoryResult<E> {
        let row = self.store_call(self.store.insert(entity)).await?;
        debug!("Created in store");

        let batch = self.create_batch(&row).await;
        self.sync_cache("create", row.public_id(), batch).await;
        Ok(row)
    }

    /// Apply `mutate` to a copy of `current` and persist it.
    ///
    /// References that changed value are moved; references that went away
    /// are blanked. Listing order is left alone.
    #[instrument(skip(self, current, mutate), fields(kind = E::KIND.as_str(), public_id = %current.public_id()))]
    pub async fn update<F>(&self, current: &E, mutate: F) -> RepositoryResult<E>
    where
        F: FnOnce(&mut E),
    {
        let mut next = current.clone();
        mutate(&mut next);
        next.header_mut().touch(self.clock.now());

        let row = self.store_call(self.store.update(&next)).await?;

        let batch = self.update_batch(current, &row);
        self.sync_cache("update", row.public_id(), batch).await;
        Ok(row)
    }

    /// Delete from the store and leave blank markers where the row was cached.
    #[instrument(skip(self, entity), fields(kind = E::KIND.as_str(), public_id = %entity.public_id()))]
    pub async fn delete(&self, entity: &E) -> RepositoryResult<()> {
        self.store_call(self.store.delete(entity)).await?;

        let batch = Ok(self.removal_batch(entity));
        self.sync_cache("delete", entity.public_id(), batch).await;
        Ok(())
    }

    /// Drop rows the store already removed (e.g. by a bulk sweep) from every cache.
    pub async fn evict(&self, rows: &[E]) {
        if rows.is_empty() {
            return;
        }
        let mut batch = CacheBatch::new();
        for row in rows {
            batch.extend(self.removal_batch(row).into_ops());
        }
        self.sync_cache("evict", "*", Ok(batch)).await;
    }

    /// Move a cached reference from `old` to `new` atomically.
    pub async fn update_reference(
        &self,
        old: &Reference,
        new: &Reference,
        public_id: &str,
    ) -> RepositoryResult<()> {
        self.cache_call(self.references.update_reference(old, new, public_id))
            .await?;
        Ok(())
    }

    // ==================== Reads ====================

    /// Cache-only lookup.
    ///
    /// `NotFound` is only returned when a blank marker confirms absence;
    /// anything uncached is `SeedRequired`.
    #[instrument(skip(self), fields(kind = E::KIND.as_str()))]
    pub async fn fetch(&self, lookup: &Lookup) -> RepositoryResult<E> {
        let public_id = match lookup {
            Lookup::PublicId(id) => id.clone(),
            Lookup::Reference(reference) => {
                match self.cache_call(self.references.get(reference)).await? {
                    CacheLookup::Hit { value, stale_blank } => {
                        if stale_blank {
                            self.clear_stale(self.references.clear_blank_ops(reference)).await;
                        }
                        value
                    }
                    CacheLookup::Blank => return Err(RepositoryError::NotFound),
                    CacheLookup::Miss => return Err(RepositoryError::SeedRequired),
                }
            }
        };

        match self.cache_call(self.primary.get(&public_id)).await? {
            CacheLookup::Hit { value, stale_blank } => {
                if stale_blank {
                    self.clear_stale(self.primary.clear_blank_ops(&public_id)).await;
                }
                Ok(value)
            }
            CacheLookup::Blank => Err(RepositoryError::NotFound),
            CacheLookup::Miss => Err(RepositoryError::SeedRequired),
        }
    }

    /// Read from the store and repopulate the caches.
    ///
    /// A confirmed miss blanks the key that was asked for.
    #[instrument(skip(self), fields(kind = E::KIND.as_str()))]
    pub async fn seed(&self, lookup: &Lookup) -> RepositoryResult<E> {
        match self.store_call(self.store.find(lookup)).await {
            Ok(row) => {
                let batch = self.seed_batch(&row);
                self.sync_cache("seed", row.public_id(), batch).await;
                Ok(row)
            }
            Err(StoreError::NotFound) => {
                let ops = match lookup {
                    Lookup::PublicId(id) => self.primary.blank_ops(id),
                    Lookup::Reference(reference) => self.references.blank_ops(reference),
                };
                debug!(%lookup, "Not in store; marking blank");
                self.sync_cache("seed_blank", &lookup.to_string(), Ok(ops.into()))
                    .await;
                Err(RepositoryError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `fetch`, falling back to `seed` when the cache has nothing either way.
    pub async fn fetch_or_seed(&self, lookup: &Lookup) -> RepositoryResult<E> {
        match self.fetch(lookup).await {
            Err(RepositoryError::SeedRequired) => self.seed(lookup).await,
            other => other,
        }
    }

    /// One page of a listing, from cache only.
    #[instrument(skip(self), fields(kind = E::KIND.as_str()))]
    pub async fn list(&self, query: &ListQuery) -> RepositoryResult<Page<E>> {
        let range = RangeQuery {
            direction: query.direction,
            after: query.cursor.map(|c| c as f64),
            limit: query.limit,
        };
        let fetched = self
            .cache_call(self.listing.fetch(&self.primary, query.partition.as_ref(), &range))
            .await?;

        match fetched {
            ListingFetch::Page { items, next_cursor } => Ok(Page {
                items,
                next_cursor: next_cursor.map(|score| score as i64),
            }),
            ListingFetch::Empty => Ok(Page::empty()),
            ListingFetch::Cold => Err(RepositoryError::SeedRequired),
        }
    }

    /// Rebuild one listing from the store and answer the page from the rows read.
    #[instrument(skip(self), fields(kind = E::KIND.as_str()))]
    pub async fn seed_list(&self, query: &ListQuery) -> RepositoryResult<Page<E>> {
        let rows = self
            .store_call(self.store.find_partition(query.partition.as_ref()))
            .await?;

        let members: Vec<(String, f64)> = rows
            .iter()
            .map(|row| (row.public_id().to_string(), row.listing_score() as f64))
            .collect();
        let mut batch = CacheBatch::from(self.listing.replace_ops(query.partition.as_ref(), &members));
        let entries = rows
            .iter()
            .map(|row| self.primary.set_ops(row))
            .collect::<Result<Vec<_>, CacheError>>()
            .map(|ops| {
                batch.extend(ops.into_iter().flatten());
                batch
            });
        self.sync_cache("seed_list", "*", entries).await;

        Ok(query.paginate(rows))
    }

    /// `list`, rebuilding the listing when it is cold.
    pub async fn list_or_seed(&self, query: &ListQuery) -> RepositoryResult<Page<E>> {
        match self.list(query).await {
            Err(RepositoryError::SeedRequired) => self.seed_list(query).await,
            other => other,
        }
    }

    /// Stream every row into the primary cache and the listings.
    ///
    /// References are left to lazy seeding. Pure overwrite, so it is safe
    /// alongside live traffic. Returns the number of rows written.
    #[instrument(skip(self), fields(kind = E::KIND.as_str()))]
    pub async fn seed_all(&self) -> RepositoryResult<usize> {
        let mut after_id = 0;
        let mut total = 0;

        loop {
            let rows = self
                .store_call(self.store.scan(after_id, self.options.seed_batch_size))
                .await?;
            let Some(last) = rows.last() else {
                break;
            };
            after_id = last.header().system_id();

            let batch = self.fill_batch(&rows)?;
            self.cache_call(self.cache.apply(batch)).await?;
            total += rows.len();
            debug!(after_id, total, "Seeded chunk");

            if (rows.len() as i64) < self.options.seed_batch_size {
                break;
            }
        }

        if total == 0 {
            self.cache_call(self.listing.mark_blank_page(None)).await?;
        }
        info!(entity = E::KIND.as_str(), total, "Cache warm-up complete");
        Ok(total)
    }

    pub async fn health_check(&self) -> RepositoryResult<()> {
        self.store_call(self.store.health_check()).await?;
        self.cache_call(self.cache.health_check()).await?;
        Ok(())
    }

    // ==================== Cache batches ====================

    async fn create_batch(&self, row: &E) -> Result<CacheBatch, CacheError> {
        let mut batch = CacheBatch::from(self.primary.set_ops(row)?);
        for reference in row.references() {
            batch.extend(self.references.set_ops(&reference, row.public_id()));
        }
        let listing_ops = self
            .cache_call(self.listing.add_ops(
                &row.partitions(),
                row.public_id(),
                row.listing_score() as f64,
            ))
            .await?;
        batch.extend(listing_ops);
        Ok(batch)
    }

    fn update_batch(&self, previous: &E, row: &E) -> Result<CacheBatch, CacheError> {
        let mut batch = CacheBatch::from(self.primary.set_ops(row)?);
        let current = row.references();
        let id = row.public_id();

        for old in previous.references() {
            match current.iter().find(|r| r.kind == old.kind) {
                Some(new) if *new != old => {
                    batch.extend(self.references.update_ops(&old, new, id));
                }
                Some(_) => {}
                None => batch.extend(self.references.blank_ops(&old)),
            }
        }
        let previous = previous.references();
        for new in &current {
            match previous.iter().find(|r| r.kind == new.kind) {
                Some(old) if old != new => {}
                _ => batch.extend(self.references.set_ops(new, id)),
            }
        }
        Ok(batch)
    }

    fn removal_batch(&self, row: &E) -> CacheBatch {
        let mut batch = CacheBatch::from(self.primary.blank_ops(row.public_id()));
        for reference in row.references() {
            batch.extend(self.references.blank_ops(&reference));
        }
        batch.extend(self.listing.remove_ops(&row.partitions(), row.public_id()));
        batch
    }

    fn seed_batch(&self, row: &E) -> Result<CacheBatch, CacheError> {
        let mut batch = CacheBatch::from(self.primary.set_ops(row)?);
        for reference in row.references() {
            batch.extend(self.references.set_ops(&reference, row.public_id()));
        }
        Ok(batch)
    }

    fn fill_batch(&self, rows: &[E]) -> Result<CacheBatch, CacheError> {
        let mut batch = CacheBatch::new();
        let mut listings: Vec<(Option<Partition>, Vec<(String, f64)>)> = vec![(None, Vec::new())];

        for row in rows {
            batch.extend(self.primary.set_ops(row)?);
            let member = (row.public_id().to_string(), row.listing_score() as f64);
            for partition in std::iter::once(None).chain(row.partitions().into_iter().map(Some)) {
                match listings.iter_mut().find(|(p, _)| *p == partition) {
                    Some((_, members)) => members.push(member.clone()),
                    None => listings.push((partition, vec![member.clone()])),
                }
            }
        }
        for (partition, members) in &listings {
            batch.extend(self.listing.fill_ops(partition.as_ref(), members));
        }
        Ok(batch)
    }

    // ==================== Plumbing ====================

    /// Run a store call under the operation timeout.
    pub(crate) async fn store_call<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        timeout(self.options.operation_timeout, call)
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    async fn cache_call<T, F>(&self, call: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        timeout(self.options.operation_timeout, call)
            .await
            .map_err(|_| CacheError::Timeout)?
    }

    /// Apply a post-commit batch; failures only reach logs and metrics.
    async fn sync_cache(
        &self,
        operation: &'static str,
        public_id: &str,
        batch: Result<CacheBatch, CacheError>,
    ) {
        let result = match batch {
            Ok(batch) if batch.is_empty() => Ok(()),
            Ok(batch) => self.cache_call(self.cache.apply(batch)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.report(operation, public_id, &e);
        }
    }

    async fn clear_stale(&self, ops: Vec<CacheOp>) {
        let result = self.cache_call(self.cache.apply(ops.into())).await;
        if let Err(e) = result {
            self.report("clear_blank", "*", &e);
        }
    }

    fn report(&self, operation: &'static str, public_id: &str, error: &CacheError) {
        warn!(
            entity = E::KIND.as_str(),
            operation,
            public_id,
            error = %error,
            "Cache write failed; store remains authoritative"
        );
        CACHE_WRITE_FAILURES
            .with_label_values(&[E::KIND.as_str(), operation])
            .inc();
    }
}
