use crate::common::config::{ObjectId, StoreConfig};
use crate::common::exception::{DBError, TransactionError};
use crate::concurrency::lock_manager::LockMode;
use crate::concurrency::transaction::Transaction;
use crate::concurrency::transaction_manager::TransactionManager;
use crate::storage::cache::cache_manager::CacheManager;
use crate::storage::cache::cache_traits::{AddOutcome, ObjectCache};
use crate::storage::cache::cacheable::{Cacheable, FlushHook, NamedCacheable};
use crate::storage::cache::container::CacheContainer;
use crate::storage::cache::named::NamedCache;
use crate::storage::collection::Collection;
use crate::storage::collection_store::CollectionStore;
use crate::storage::record::CollectionRecord;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

pub const COLLECTION_CACHE_NAME: &str = "collections";

pub type CollectionCache = CacheContainer<Collection, NamedCache<Collection>>;

/// What [`DBInstance::shutdown`] found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// Transactions still open when the instance shut down.
    pub active_transactions: usize,
    pub flushed: usize,
    /// Dirty collections that were locked or failed to flush.
    pub skipped: usize,
}

/// One storage instance: the collection cache, its budget, the backing store and
/// the transaction manager. Everything that used to be process-wide lives here.
pub struct DBInstance {
    config: StoreConfig,
    cache_manager: Arc<CacheManager>,
    collections: CollectionCache,
    store: Arc<CollectionStore>,
    transaction_manager: TransactionManager,
}

impl DBInstance {
    pub fn new(config: StoreConfig) -> Result<Self, DBError> {
        Self::with_store(config, Arc::new(CollectionStore::new()))
    }

    /// Creates an instance over an existing store, e.g. one shared with a previous instance.
    pub fn with_store(config: StoreConfig, store: Arc<CollectionStore>) -> Result<Self, DBError> {
        config.validate()?;

        let cache_manager = Arc::new(CacheManager::new(&config.budget));
        let hook: Arc<dyn FlushHook<Collection>> = store.clone();
        let cache = NamedCache::with_config(COLLECTION_CACHE_NAME, &config.collection_cache)
            .with_manager(Arc::clone(&cache_manager))?
            .with_flush_hook(hook);

        info!(
            "DB instance created: collection cache capacity {}, budget {}",
            config.collection_cache.capacity, config.budget.max_total_capacity
        );

        Ok(Self {
            config,
            cache_manager,
            collections: CacheContainer::new(cache),
            store,
            transaction_manager: TransactionManager::new(),
        })
    }

    pub fn get_config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn get_cache_manager(&self) -> &Arc<CacheManager> {
        &self.cache_manager
    }

    pub fn get_store(&self) -> &Arc<CollectionStore> {
        &self.store
    }

    pub fn get_transaction_manager(&self) -> &TransactionManager {
        &self.transaction_manager
    }

    pub fn collections(&self) -> &CollectionCache {
        &self.collections
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.config.lock.acquire_timeout()
    }

    pub fn begin_transaction(&self) -> Result<Transaction, TransactionError> {
        self.transaction_manager.begin()
    }

    /// Creates a new, dirty collection and caches it pinned for the caller.
    ///
    /// The caller must [`release_collection`](Self::release_collection) it when done.
    pub fn create_collection(
        &self,
        id: ObjectId,
        name: impl Into<String>,
    ) -> Result<Arc<Collection>, DBError> {
        let record = CollectionRecord::new(id, name);
        let collection = Arc::new(Collection::from_record(record, self.lock_timeout()));
        collection.set_dirty(true);
        let outcome = self.collections.add(Arc::clone(&collection), 1)?;
        if outcome == AddOutcome::NotCached {
            collection.increment_ref_count();
        }
        debug!("Created collection {} ('{}')", id, collection.name());
        Ok(collection)
    }

    /// Returns the collection pinned for the caller, loading it on a cache miss.
    ///
    /// # Returns
    /// - `Ok(Some(collection))` with its reference count incremented.
    /// - `Ok(None)` if the collection exists neither in the cache nor in the store.
    /// - `Err(DBError)` if the stored record is corrupt or the cache is full of
    ///   pinned collections.
    pub fn open_collection(&self, id: ObjectId) -> Result<Option<Arc<Collection>>, DBError> {
        if let Some(collection) = self.collections.checkout(id) {
            return Ok(Some(collection));
        }

        // Check again and load under the exclusive lock so two threads missing on
        // the same id cannot both insert a copy.
        let mut cache = self.collections.write();
        if let Some(collection) = cache.get(id) {
            collection.increment_ref_count();
            return Ok(Some(collection));
        }
        let Some(loaded) = self.store.load(id, self.lock_timeout())? else {
            return Ok(None);
        };
        let collection = Arc::new(loaded);
        if cache.add(Arc::clone(&collection), 1)? == AddOutcome::NotCached {
            collection.increment_ref_count();
        }
        debug!("Loaded collection {} into the cache", id);
        Ok(Some(collection))
    }

    pub fn open_collection_by_name(&self, name: &str) -> Result<Option<Arc<Collection>>, DBError> {
        if let Some(collection) = self.collections.checkout_by_name(name) {
            return Ok(Some(collection));
        }
        match self.store.find_by_name(name) {
            Some(id) => self.open_collection(id),
            None => Ok(None),
        }
    }

    /// Drops the caller's pin on `collection`.
    pub fn release_collection(&self, collection: &Collection) -> u32 {
        collection.decrement_ref_count()
    }

    /// Acquires `collection`'s lock on behalf of `txn`, blocking up to the configured timeout.
    pub fn lock_collection(
        &self,
        txn: &mut Transaction,
        collection: &Collection,
        mode: LockMode,
    ) -> Result<(), DBError> {
        txn.acquire_lock(Arc::clone(collection.lock()), mode)?;
        Ok(())
    }

    /// Writes every dirty cached collection to the store.
    ///
    /// Collections whose lock cannot be taken immediately are skipped; they are
    /// being changed and will be flushed by a later call or on eviction.
    pub fn flush_dirty(&self) -> (usize, usize) {
        let mut flushed = 0;
        let mut skipped = 0;
        for collection in self.collections.dirty_objects() {
            let lock = Arc::clone(collection.lock());
            if !lock.try_acquire(LockMode::Read) {
                skipped += 1;
                continue;
            }
            // Cleared before the snapshot so concurrent mutations re-mark it.
            collection.set_dirty(false);
            match self.store.write(&collection) {
                Ok(()) => flushed += 1,
                Err(e) => {
                    collection.set_dirty(true);
                    warn!("Failed to flush collection {}: {}", collection.identity(), e);
                    skipped += 1;
                }
            }
            if let Err(e) = lock.release(LockMode::Read) {
                warn!(
                    "Failed to release read lock on collection {}: {}",
                    collection.identity(),
                    e
                );
            }
        }
        debug!("Flushed {} dirty collections, skipped {}", flushed, skipped);
        (flushed, skipped)
    }

    /// Stops new transactions, flushes dirty collections and disables the cache.
    ///
    /// Open transactions are reported, not aborted; their owners still have to
    /// finish them.
    pub fn shutdown(&self) -> ShutdownReport {
        let active_transactions = self.transaction_manager.shutdown();
        let (flushed, skipped) = self.flush_dirty();
        self.collections.set_operational(false);
        let stats = self.collections.stats();
        info!("DB instance shut down: {}", stats);
        ShutdownReport {
            active_transactions,
            flushed,
            skipped,
        }
    }
}
