use crate::common::config::ObjectId;
use crate::common::exception::CacheError;
use crate::storage::cache::cache_traits::{
    AddOutcome, CacheStats, NamedObjectCache, ObjectCache, ResizeReport,
};
use crate::storage::cache::cacheable::{Cacheable, NamedCacheable};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Thread-safe wrapper that owns a cache behind a reader/writer lock.
///
/// Lookups share the lock; anything that changes membership or capacity takes it
/// exclusively. Object locks are only ever *tried* while this lock is held, so a
/// transaction blocked on an object lock never holds the cache lock.
pub struct CacheContainer<T: Cacheable, C: ObjectCache<T>> {
    cache_lock: RwLock<C>,
    _object: PhantomData<fn() -> T>,
}

impl<T: Cacheable, C: ObjectCache<T>> CacheContainer<T, C> {
    pub fn new(cache: C) -> Self {
        Self {
            cache_lock: RwLock::new(cache),
            _object: PhantomData,
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<Arc<T>> {
        self.cache_lock.read().get(id)
    }

    /// Looks up `id` and pins it in one step.
    ///
    /// The pin is taken before the shared lock is dropped, so the object cannot be
    /// evicted between the lookup and the increment.
    pub fn checkout(&self, id: ObjectId) -> Option<Arc<T>> {
        let cache = self.cache_lock.read();
        let object = cache.get(id)?;
        object.increment_ref_count();
        Some(object)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.cache_lock.read().contains(id)
    }

    pub fn add(&self, object: Arc<T>, initial_ref_count: u32) -> Result<AddOutcome, CacheError> {
        self.cache_lock.write().add(object, initial_ref_count)
    }

    pub fn remove(&self, id: ObjectId) -> Option<Arc<T>> {
        self.cache_lock.write().remove(id)
    }

    pub fn resize(&self, new_capacity: usize) -> Result<ResizeReport, CacheError> {
        self.cache_lock.write().resize(new_capacity)
    }

    pub fn set_operational(&self, operational: bool) {
        self.cache_lock.write().set_operational(operational)
    }

    pub fn is_operational(&self) -> bool {
        self.cache_lock.read().is_operational()
    }

    pub fn len(&self) -> usize {
        self.cache_lock.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache_lock.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache_lock.read().capacity()
    }

    pub fn approximate_total_size(&self) -> usize {
        self.cache_lock.read().approximate_total_size()
    }

    pub fn ids_in_recency_order(&self) -> Vec<ObjectId> {
        self.cache_lock.read().ids_in_recency_order()
    }

    pub fn dirty_objects(&self) -> Vec<Arc<T>> {
        self.cache_lock.read().dirty_objects()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache_lock.read().stats()
    }

    /// Shared access for compound reads that must see one consistent state.
    pub fn read(&self) -> RwLockReadGuard<'_, C> {
        self.cache_lock.read()
    }

    /// Exclusive access for compound updates.
    pub fn write(&self) -> RwLockWriteGuard<'_, C> {
        self.cache_lock.write()
    }
}

impl<T: NamedCacheable, C: NamedObjectCache<T>> CacheContainer<T, C> {
    pub fn get_by_name(&self, name: &str) -> Option<Arc<T>> {
        self.cache_lock.read().get_by_name(name)
    }

    pub fn checkout_by_name(&self, name: &str) -> Option<Arc<T>> {
        let cache = self.cache_lock.read();
        let object = cache.get_by_name(name)?;
        object.increment_ref_count();
        Some(object)
    }

    pub fn remove_by_name(&self, name: &str) -> Option<Arc<T>> {
        self.cache_lock.write().remove_by_name(name)
    }
}

impl<T: Cacheable, C: ObjectCache<T>> fmt::Debug for CacheContainer<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cache_lock.try_read() {
            Some(cache) => f
                .debug_struct("CacheContainer")
                .field("name", &cache.name())
                .field("len", &cache.len())
                .field("capacity", &cache.capacity())
                .finish(),
            None => f
                .debug_struct("CacheContainer")
                .field("locked", &true)
                .finish(),
        }
    }
}
