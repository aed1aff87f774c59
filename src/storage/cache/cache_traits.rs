//! # Object Cache Traits
//!
//! Interfaces shared by the object caches and the container that guards them.
//!
//! ```text
//!                  ┌──────────────────────────────────────────────┐
//!                  │             ObjectCache<T: Cacheable>         │
//!                  │                                              │
//!                  │  get(&, id) → Option<Arc<T>>                 │
//!                  │  add(&mut, Arc<T>, ref_count) → AddOutcome   │
//!                  │  remove(&mut, id) → Option<Arc<T>>           │
//!                  │  resize(&mut, capacity) → ResizeReport       │
//!                  │  len / capacity / approximate_total_size     │
//!                  └──────────────────────┬───────────────────────┘
//!                                         │
//!                                         ▼
//!                  ┌──────────────────────────────────────────────┐
//!                  │      NamedObjectCache<T: NamedCacheable>      │
//!                  │                                              │
//!                  │  get_by_name(&, name) → Option<Arc<T>>       │
//!                  │  remove_by_name(&mut, name)                  │
//!                  └──────────────────────────────────────────────┘
//! ```
//!
//! `get` takes `&self` so lookups can run under the container's shared lock; recency
//! bookkeeping is serialized inside the cache. Everything that changes membership
//! takes `&mut self` and therefore needs the container's exclusive lock.

use crate::common::config::ObjectId;
use crate::common::exception::CacheError;
use crate::storage::cache::cacheable::{Cacheable, NamedCacheable};
use std::fmt;
use std::sync::Arc;

/// What `add` did with the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New identity, now at the most-recently-used end.
    Cached,
    /// An object with the same identity was already cached and has been replaced.
    /// A dirty previous instance is handed to the flush hook first.
    Replaced,
    /// The cache is not operational; nothing was stored.
    NotCached,
}

/// Result of one eviction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionOutcome {
    Evicted(ObjectId),
    /// Every candidate was pinned, locked, refused to unload or failed to flush.
    NoProgress,
}

/// Outcome of an explicit resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeReport {
    pub requested: usize,
    /// Capacity actually in effect afterwards. Larger than `requested` when a
    /// shrink could not evict enough entries.
    pub capacity: usize,
    pub len: usize,
    pub evicted: usize,
}

impl ResizeReport {
    pub fn reached_target(&self) -> bool {
        self.capacity == self.requested
    }

    /// How many entries short of the requested capacity the cache stayed.
    pub fn shortfall(&self) -> usize {
        self.capacity.saturating_sub(self.requested)
    }
}

/// Point-in-time counters for one cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub name: String,
    pub capacity: usize,
    pub len: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub thrashing: u64,
    pub hit_ratio: f64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} entries, {} hits, {} misses ({:.1}%), {} evictions, {} thrashing",
            self.name,
            self.len,
            self.capacity,
            self.hits,
            self.misses,
            self.hit_ratio * 100.0,
            self.evictions,
            self.thrashing
        )
    }
}

/// Bounded object cache with least-recently-used replacement.
pub trait ObjectCache<T: Cacheable> {
    fn name(&self) -> &str;

    /// Looks up an object and marks it most recently used.
    fn get(&self, id: ObjectId) -> Option<Arc<T>>;

    /// Membership test that does not touch recency.
    fn contains(&self, id: ObjectId) -> bool;

    /// Inserts `object` with its reference count set to `initial_ref_count`.
    ///
    /// # Returns
    /// - `Ok(AddOutcome)` describing what happened.
    /// - `Err(CacheError::CapacityExhausted)` if the cache is full of pinned or
    ///   locked objects and could not grow. The object is not cached in that case.
    fn add(&mut self, object: Arc<T>, initial_ref_count: u32) -> Result<AddOutcome, CacheError>;

    /// Unconditional removal requested by the owner. No flush is attempted.
    fn remove(&mut self, id: ObjectId) -> Option<Arc<T>>;

    /// Changes capacity. Shrinking evicts from the least-recently-used end; entries
    /// that cannot be evicted keep the capacity above the requested value.
    fn resize(&mut self, new_capacity: usize) -> Result<ResizeReport, CacheError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;

    /// Sum of `approx_size` over all cached objects.
    fn approximate_total_size(&self) -> usize;

    fn is_operational(&self) -> bool;

    /// A non-operational cache accepts lookups but silently drops adds.
    fn set_operational(&mut self, operational: bool);

    /// Identities from least to most recently used.
    fn ids_in_recency_order(&self) -> Vec<ObjectId>;

    fn dirty_objects(&self) -> Vec<Arc<T>>;

    fn stats(&self) -> CacheStats;
}

/// Object cache with a secondary index from path name to identity.
pub trait NamedObjectCache<T: NamedCacheable>: ObjectCache<T> {
    fn get_by_name(&self, name: &str) -> Option<Arc<T>>;

    fn remove_by_name(&mut self, name: &str) -> Option<Arc<T>>;

    fn contains_name(&self, name: &str) -> bool;
}
