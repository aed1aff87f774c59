//! # LRU Object Cache
//!
//! Bounded map from identity to `Arc<T>` with least-recently-used replacement
//! that respects pins, locks and dirty state.
//!
//! ```text
//!   entries: HashMap<ObjectId, Arc<T>>
//!
//!   recency (intrusive list keyed by id, O(1) touch/unlink):
//!
//!     head (LRU)                                        tail (MRU)
//!       │                                                   │
//!       ▼                                                   ▼
//!     [ 7 ] ◄──► [ 3 ] ◄──► [ 12 ] ◄──► [ 5 ] ◄──► [ 9 ]
//!       ▲
//!       └── eviction scan starts here
//! ```
//!
//! ## Eviction pass
//!
//! ```text
//!   for attempt in 1..=eviction_attempts:
//!     for candidate from LRU to MRU:
//!       ref_count > 0                      → skip (pinned)
//!       try_acquire(Read) fails            → skip (someone is working on it)
//!       allow_unload() == false            → release, skip
//!       dirty and flush fails / no hook    → release, skip
//!       otherwise                          → remove, release, done
//!   nothing found                          → NoProgress
//! ```
//!
//! The evictor only ever *tries* the object lock. It runs with the cache lock held
//! exclusively, so blocking there would stall every other cache user behind one
//! long-running transaction.
//!
//! When an add overflows the cache and the pass makes no progress, the cache asks
//! its [`CacheManager`] for more room. If that is refused too, the new object is
//! taken back out and the add fails with [`CacheError::CapacityExhausted`].

use crate::common::config::{CacheConfig, ObjectId};
use crate::common::exception::CacheError;
use crate::concurrency::lock_manager::LockMode;
use crate::storage::cache::accounting::Accounting;
use crate::storage::cache::cache_manager::CacheManager;
use crate::storage::cache::cache_traits::{
    AddOutcome, CacheStats, EvictionOutcome, ObjectCache, ResizeReport,
};
use crate::storage::cache::cacheable::{Cacheable, FlushHook};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: Option<ObjectId>,
    next: Option<ObjectId>,
}

/// Doubly linked recency order threaded through a map.
#[derive(Debug, Default)]
struct RecencyList {
    links: HashMap<ObjectId, Link>,
    head: Option<ObjectId>,
    tail: Option<ObjectId>,
}

impl RecencyList {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            links: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    fn push_back(&mut self, id: ObjectId) {
        debug_assert!(!self.links.contains_key(&id));
        match self.tail {
            Some(tail) => {
                if let Some(link) = self.links.get_mut(&tail) {
                    link.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }
        self.links.insert(
            id,
            Link {
                prev: self.tail,
                next: None,
            },
        );
        self.tail = Some(id);
    }

    fn unlink(&mut self, id: ObjectId) -> bool {
        let Some(link) = self.links.remove(&id) else {
            return false;
        };
        match link.prev {
            Some(prev) => {
                if let Some(prev_link) = self.links.get_mut(&prev) {
                    prev_link.next = link.next;
                }
            }
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => {
                if let Some(next_link) = self.links.get_mut(&next) {
                    next_link.prev = link.prev;
                }
            }
            None => self.tail = link.prev,
        }
        true
    }

    /// Moves `id` to the most-recently-used end.
    fn touch(&mut self, id: ObjectId) {
        if self.tail != Some(id) && self.unlink(id) {
            self.push_back(id);
        }
    }

    fn front(&self) -> Option<ObjectId> {
        self.head
    }

    fn next_of(&self, id: ObjectId) -> Option<ObjectId> {
        self.links.get(&id).and_then(|link| link.next)
    }

    fn reserve(&mut self, additional: usize) {
        self.links.reserve(additional);
    }

    fn ids(&self) -> Vec<ObjectId> {
        let mut ids = Vec::with_capacity(self.links.len());
        let mut cursor = self.head;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.next_of(id);
        }
        ids
    }
}

/// Least-recently-used cache of shared objects.
///
/// Lookups take `&self`: the recency list sits behind its own short-lived latch so
/// concurrent readers under a shared container lock can all record their hits.
pub struct LruCache<T: Cacheable> {
    name: String,
    capacity: usize,
    config: CacheConfig,
    entries: HashMap<ObjectId, Arc<T>>,
    recency: Mutex<RecencyList>,
    accounting: Accounting,
    operational: bool,
    manager: Option<Arc<CacheManager>>,
    flush_hook: Option<Arc<dyn FlushHook<T>>>,
}

impl<T: Cacheable> LruCache<T> {
    /// Creates a cache with default growth settings.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let defaults = CacheConfig::default();
        let config = CacheConfig {
            capacity,
            max_capacity: defaults.max_capacity.max(capacity),
            ..defaults
        };
        Self::with_config(name, &config)
    }

    pub fn with_config(name: impl Into<String>, config: &CacheConfig) -> Self {
        let name = name.into();
        let capacity = config.capacity;
        debug!("Creating LRU cache '{}' with capacity {}", name, capacity);
        Self {
            name,
            capacity,
            config: config.clone(),
            entries: HashMap::with_capacity(capacity),
            recency: Mutex::new(RecencyList::with_capacity(capacity)),
            accounting: Accounting::new(capacity),
            operational: true,
            manager: None,
            flush_hook: None,
        }
    }

    /// Claims this cache's capacity from `manager` and routes future growth through it.
    pub fn with_manager(mut self, manager: Arc<CacheManager>) -> Result<Self, CacheError> {
        manager.register(&self.name, self.capacity)?;
        self.manager = Some(manager);
        Ok(self)
    }

    pub fn with_flush_hook(mut self, hook: Arc<dyn FlushHook<T>>) -> Self {
        self.flush_hook = Some(hook);
        self
    }

    pub fn set_flush_hook(&mut self, hook: Arc<dyn FlushHook<T>>) {
        self.flush_hook = Some(hook);
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Runs one eviction pass on behalf of the owner.
    pub fn evict(&mut self) -> EvictionOutcome {
        self.evict_observed(&mut |_| {})
    }

    pub(crate) fn evict_observed(&mut self, on_removed: &mut dyn FnMut(&T)) -> EvictionOutcome {
        match self.evict_candidate(None) {
            Some(object) => {
                on_removed(object.as_ref());
                EvictionOutcome::Evicted(object.identity())
            }
            None => EvictionOutcome::NoProgress,
        }
    }

    /// `add` that reports every object leaving the cache as a side effect.
    pub(crate) fn add_observed(
        &mut self,
        object: Arc<T>,
        initial_ref_count: u32,
        on_removed: &mut dyn FnMut(&T),
    ) -> Result<AddOutcome, CacheError> {
        if !self.operational {
            debug!(
                "Cache '{}' is not operational, object {} not cached",
                self.name,
                object.identity()
            );
            return Ok(AddOutcome::NotCached);
        }

        let id = object.identity();
        object.set_ref_count(initial_ref_count);

        if let Some(previous) = self.entries.insert(id, Arc::clone(&object)) {
            self.recency.get_mut().touch(id);
            if !Arc::ptr_eq(&previous, &object) {
                self.flush_replaced(&previous);
            }
            on_removed(previous.as_ref());
            trace!("Cache '{}': replaced object {}", self.name, id);
            return Ok(AddOutcome::Replaced);
        }

        self.recency.get_mut().push_back(id);
        self.accounting.record_insert(id);

        if self.entries.len() <= self.capacity {
            return Ok(AddOutcome::Cached);
        }

        if let Some(evicted) = self.evict_candidate(Some(id)) {
            on_removed(evicted.as_ref());
            if self.accounting.should_grow(self.config.growth_threshold) {
                debug!("Cache '{}' is thrashing, requesting growth", self.name);
                self.grow();
            }
            return Ok(AddOutcome::Cached);
        }

        if self.grow() {
            return Ok(AddOutcome::Cached);
        }

        self.entries.remove(&id);
        self.recency.get_mut().unlink(id);
        on_removed(object.as_ref());
        warn!(
            "Cache '{}' is full ({} entries) and nothing could be evicted, object {} rejected",
            self.name, self.capacity, id
        );
        Err(CacheError::CapacityExhausted {
            cache: self.name.clone(),
            capacity: self.capacity,
            len: self.entries.len(),
        })
    }

    pub(crate) fn remove_observed(&mut self, id: ObjectId) -> Option<Arc<T>> {
        let removed = self.entries.remove(&id)?;
        self.recency.get_mut().unlink(id);
        trace!("Cache '{}': removed object {}", self.name, id);
        Some(removed)
    }

    pub(crate) fn resize_observed(
        &mut self,
        new_capacity: usize,
        on_removed: &mut dyn FnMut(&T),
    ) -> Result<ResizeReport, CacheError> {
        if new_capacity >= self.capacity {
            if let Some(manager) = &self.manager {
                manager.reserve(&self.name, self.capacity, new_capacity)?;
            }
            self.config.max_capacity = self.config.max_capacity.max(new_capacity);
            self.apply_capacity(new_capacity);
            info!("Cache '{}' resized to {}", self.name, new_capacity);
            return Ok(ResizeReport {
                requested: new_capacity,
                capacity: new_capacity,
                len: self.entries.len(),
                evicted: 0,
            });
        }

        let mut evicted = 0;
        while self.entries.len() > new_capacity {
            match self.evict_candidate(None) {
                Some(object) => {
                    on_removed(object.as_ref());
                    evicted += 1;
                }
                None => break,
            }
        }

        let capacity = new_capacity.max(self.entries.len());
        if capacity > new_capacity {
            warn!(
                "Cache '{}' could only shrink to {} (requested {}): remaining entries are pinned or locked",
                self.name, capacity, new_capacity
            );
        }
        self.apply_capacity(capacity);
        if let Some(manager) = &self.manager {
            manager.release(&self.name, capacity);
        }
        info!(
            "Cache '{}' resized to {} ({} evicted)",
            self.name, capacity, evicted
        );

        Ok(ResizeReport {
            requested: new_capacity,
            capacity,
            len: self.entries.len(),
            evicted,
        })
    }

    /// Scans from the LRU end for an object that may be unloaded right now.
    fn evict_candidate(&mut self, exclude: Option<ObjectId>) -> Option<Arc<T>> {
        let attempts = self.config.eviction_attempts.max(1);
        for attempt in 1..=attempts {
            let mut cursor = self.recency.get_mut().front();
            while let Some(id) = cursor {
                cursor = self.recency.get_mut().next_of(id);
                if exclude == Some(id) {
                    continue;
                }
                let Some(object) = self.entries.get(&id).map(Arc::clone) else {
                    continue;
                };
                if object.ref_count() > 0 {
                    continue;
                }

                let lock = Arc::clone(object.lock());
                if !lock.try_acquire(LockMode::Read) {
                    trace!("Cache '{}': object {} is locked, skipping", self.name, id);
                    continue;
                }

                let unload = object.allow_unload()
                    && object.ref_count() == 0
                    && self.flush_before_unload(&object);
                if unload {
                    self.entries.remove(&id);
                    self.recency.get_mut().unlink(id);
                    self.accounting.record_eviction(id);
                }

                if let Err(e) = lock.release(LockMode::Read) {
                    warn!(
                        "Cache '{}': failed to release read lock on object {}: {}",
                        self.name, id, e
                    );
                }

                if unload {
                    debug!("Cache '{}': evicted object {}", self.name, id);
                    return Some(object);
                }
            }
            if attempt < attempts {
                thread::yield_now();
            }
        }
        debug!(
            "Cache '{}': no evictable object after {} attempts",
            self.name, attempts
        );
        None
    }

    /// Writes a dirty object back before it leaves the cache.
    ///
    /// The dirty flag is cleared before the hook takes its snapshot, so a
    /// mutation racing with the write marks the object dirty again and keeps it
    /// cached.
    fn flush_before_unload(&self, object: &T) -> bool {
        if !object.is_dirty() {
            return true;
        }
        let Some(hook) = &self.flush_hook else {
            debug!(
                "Cache '{}': object {} is dirty and no flush hook is set",
                self.name,
                object.identity()
            );
            return false;
        };
        object.set_dirty(false);
        match hook.flush(object) {
            Ok(()) if object.is_dirty() => {
                debug!(
                    "Cache '{}': object {} changed while flushing, keeping it",
                    self.name,
                    object.identity()
                );
                false
            }
            Ok(()) => true,
            Err(e) => {
                object.set_dirty(true);
                warn!(
                    "Cache '{}': keeping dirty object {}: {}",
                    self.name,
                    object.identity(),
                    e
                );
                false
            }
        }
    }

    /// Flushes the instance an add replaced. It is gone from the cache either way.
    fn flush_replaced(&self, previous: &T) {
        if !previous.is_dirty() {
            return;
        }
        let Some(hook) = &self.flush_hook else {
            warn!(
                "Cache '{}': replaced dirty object {} without a flush hook",
                self.name,
                previous.identity()
            );
            return;
        };
        previous.set_dirty(false);
        if let Err(e) = hook.flush(previous) {
            previous.set_dirty(true);
            warn!(
                "Cache '{}': failed to flush replaced object {}: {}",
                self.name,
                previous.identity(),
                e
            );
        }
    }

    /// Grows by the configured factor, bounded by `max_capacity` and the budget.
    fn grow(&mut self) -> bool {
        let scaled = (self.capacity as f64 * self.config.growth_factor).ceil() as usize;
        let desired = scaled
            .max(self.capacity + 1)
            .min(self.config.max_capacity);
        if desired <= self.capacity {
            debug!(
                "Cache '{}' is at its maximum capacity {}",
                self.name, self.config.max_capacity
            );
            return false;
        }
        let granted = match &self.manager {
            Some(manager) => match manager.request_growth(&self.name, self.capacity, desired) {
                Some(granted) => granted,
                None => return false,
            },
            None => desired,
        };
        info!(
            "Cache '{}' growing from {} to {}",
            self.name, self.capacity, granted
        );
        self.apply_capacity(granted);
        true
    }

    fn apply_capacity(&mut self, capacity: usize) {
        let additional = capacity.saturating_sub(self.entries.len());
        self.entries.reserve(additional);
        self.recency.get_mut().reserve(additional);
        self.capacity = capacity;
        self.accounting.reset_window(capacity);
    }
}

impl<T: Cacheable> ObjectCache<T> for LruCache<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, id: ObjectId) -> Option<Arc<T>> {
        match self.entries.get(&id) {
            Some(object) => {
                self.recency.lock().touch(id);
                self.accounting.record_hit();
                Some(Arc::clone(object))
            }
            None => {
                self.accounting.record_miss();
                None
            }
        }
    }

    fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    fn add(&mut self, object: Arc<T>, initial_ref_count: u32) -> Result<AddOutcome, CacheError> {
        self.add_observed(object, initial_ref_count, &mut |_| {})
    }

    fn remove(&mut self, id: ObjectId) -> Option<Arc<T>> {
        self.remove_observed(id)
    }

    fn resize(&mut self, new_capacity: usize) -> Result<ResizeReport, CacheError> {
        self.resize_observed(new_capacity, &mut |_| {})
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn approximate_total_size(&self) -> usize {
        self.entries.values().map(|object| object.approx_size()).sum()
    }

    fn is_operational(&self) -> bool {
        self.operational
    }

    fn set_operational(&mut self, operational: bool) {
        if self.operational != operational {
            info!(
                "Cache '{}' is now {}",
                self.name,
                if operational { "operational" } else { "disabled" }
            );
        }
        self.operational = operational;
    }

    fn ids_in_recency_order(&self) -> Vec<ObjectId> {
        self.recency.lock().ids()
    }

    fn dirty_objects(&self) -> Vec<Arc<T>> {
        self.entries
            .values()
            .filter(|object| object.is_dirty())
            .cloned()
            .collect()
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name.clone(),
            capacity: self.capacity,
            len: self.entries.len(),
            hits: self.accounting.hits(),
            misses: self.accounting.misses(),
            evictions: self.accounting.evictions(),
            thrashing: self.accounting.thrashing(),
            hit_ratio: self.accounting.hit_ratio(),
        }
    }
}

impl<T: Cacheable> Drop for LruCache<T> {
    fn drop(&mut self) {
        if let Some(manager) = &self.manager {
            manager.unregister(&self.name);
        }
    }
}

impl<T: Cacheable> fmt::Debug for LruCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.entries.len())
            .field("operational", &self.operational)
            .field("has_manager", &self.manager.is_some())
            .field("has_flush_hook", &self.flush_hook.is_some())
            .finish()
    }
}
