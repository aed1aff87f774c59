use crate::common::config::{CacheConfig, ObjectId};
use crate::common::exception::CacheError;
use crate::storage::cache::cache_manager::CacheManager;
use crate::storage::cache::cache_traits::{
    AddOutcome, CacheStats, EvictionOutcome, NamedObjectCache, ObjectCache, ResizeReport,
};
use crate::storage::cache::cacheable::{FlushHook, NamedCacheable};
use crate::storage::cache::lru::LruCache;
use log::trace;
use std::collections::HashMap;
use std::sync::Arc;

/// Drops `name → id` only if it still points at the object that left.
fn unindex<T: NamedCacheable>(names: &mut HashMap<String, ObjectId>, removed: &T) {
    let name = removed.name();
    if names.get(&name) == Some(&removed.identity()) {
        names.remove(&name);
        trace!("Name index: dropped '{}'", name);
    }
}

/// LRU cache with a secondary index from path name to identity.
///
/// The index is updated in the same `&mut self` call that changes membership, so
/// under the container's exclusive lock it can never disagree with the entries.
/// Adding a second object under an existing name re-points the name to the newer
/// object.
#[derive(Debug)]
pub struct NamedCache<T: NamedCacheable> {
    lru: LruCache<T>,
    names: HashMap<String, ObjectId>,
}

impl<T: NamedCacheable> NamedCache<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self::from_lru(LruCache::new(name, capacity))
    }

    pub fn with_config(name: impl Into<String>, config: &CacheConfig) -> Self {
        Self::from_lru(LruCache::with_config(name, config))
    }

    fn from_lru(lru: LruCache<T>) -> Self {
        let names = HashMap::with_capacity(lru.capacity());
        Self { lru, names }
    }

    pub fn with_manager(self, manager: Arc<CacheManager>) -> Result<Self, CacheError> {
        let Self { lru, names } = self;
        Ok(Self {
            lru: lru.with_manager(manager)?,
            names,
        })
    }

    pub fn with_flush_hook(mut self, hook: Arc<dyn FlushHook<T>>) -> Self {
        self.lru.set_flush_hook(hook);
        self
    }

    pub fn evict(&mut self) -> EvictionOutcome {
        let names = &mut self.names;
        self.lru.evict_observed(&mut |removed| unindex(names, removed))
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    /// Identity currently registered for `name`, without touching recency.
    pub fn lookup_name(&self, name: &str) -> Option<ObjectId> {
        self.names.get(name).copied()
    }
}

impl<T: NamedCacheable> ObjectCache<T> for NamedCache<T> {
    fn name(&self) -> &str {
        self.lru.name()
    }

    fn get(&self, id: ObjectId) -> Option<Arc<T>> {
        self.lru.get(id)
    }

    fn contains(&self, id: ObjectId) -> bool {
        self.lru.contains(id)
    }

    fn add(&mut self, object: Arc<T>, initial_ref_count: u32) -> Result<AddOutcome, CacheError> {
        let id = object.identity();
        let name = object.name();
        let names = &mut self.names;
        let outcome = self
            .lru
            .add_observed(object, initial_ref_count, &mut |removed| {
                unindex(names, removed)
            })?;
        if outcome != AddOutcome::NotCached {
            self.names.insert(name, id);
        }
        Ok(outcome)
    }

    fn remove(&mut self, id: ObjectId) -> Option<Arc<T>> {
        let removed = self.lru.remove_observed(id)?;
        unindex(&mut self.names, removed.as_ref());
        Some(removed)
    }

    fn resize(&mut self, new_capacity: usize) -> Result<ResizeReport, CacheError> {
        let names = &mut self.names;
        let report = self
            .lru
            .resize_observed(new_capacity, &mut |removed| unindex(names, removed))?;
        let additional = report.capacity.saturating_sub(self.names.len());
        self.names.reserve(additional);
        Ok(report)
    }

    fn len(&self) -> usize {
        self.lru.len()
    }

    fn capacity(&self) -> usize {
        self.lru.capacity()
    }

    fn approximate_total_size(&self) -> usize {
        self.lru.approximate_total_size()
    }

    fn is_operational(&self) -> bool {
        self.lru.is_operational()
    }

    fn set_operational(&mut self, operational: bool) {
        self.lru.set_operational(operational)
    }

    fn ids_in_recency_order(&self) -> Vec<ObjectId> {
        self.lru.ids_in_recency_order()
    }

    fn dirty_objects(&self) -> Vec<Arc<T>> {
        self.lru.dirty_objects()
    }

    fn stats(&self) -> CacheStats {
        self.lru.stats()
    }
}

impl<T: NamedCacheable> NamedObjectCache<T> for NamedCache<T> {
    fn get_by_name(&self, name: &str) -> Option<Arc<T>> {
        let id = self.names.get(name).copied()?;
        self.lru.get(id)
    }

    fn remove_by_name(&mut self, name: &str) -> Option<Arc<T>> {
        let id = self.names.get(name).copied()?;
        self.remove(id)
    }

    fn contains_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }
}
