use crate::common::config::ObjectId;
use crate::common::exception::CacheError;
use crate::concurrency::lock_manager::{LockHandle, ObjectLock};
use log::warn;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Capability every object stored in an [`LruCache`](super::lru::LruCache) provides.
///
/// Reference counts and the dirty flag use interior mutability: cached objects are
/// shared as `Arc<T>` between the cache and the subsystems that checked them out.
/// An object with a reference count above zero is *pinned* and never evicted.
pub trait Cacheable: Send + Sync {
    /// Unique within one cache for the lifetime of the object.
    fn identity(&self) -> ObjectId;

    fn ref_count(&self) -> u32;

    /// Returns the count after incrementing.
    fn increment_ref_count(&self) -> u32;

    /// Returns the count after decrementing. Never goes below zero.
    fn decrement_ref_count(&self) -> u32;

    fn set_ref_count(&self, count: u32);

    fn lock(&self) -> &LockHandle;

    /// Rough in-memory footprint in bytes.
    fn approx_size(&self) -> usize;

    /// Final check made by the evictor while it holds the object's read lock.
    fn allow_unload(&self) -> bool {
        self.ref_count() == 0
    }

    fn is_dirty(&self) -> bool;

    fn set_dirty(&self, dirty: bool);
}

/// A cacheable that is also addressable by its hierarchical path name.
pub trait NamedCacheable: Cacheable {
    fn name(&self) -> String;
}

/// Persists a dirty object before the cache lets go of it.
///
/// Called synchronously with the cache lock held exclusively and the object's read
/// lock held. On error the object stays cached.
pub trait FlushHook<T>: Send + Sync {
    fn flush(&self, object: &T) -> Result<(), CacheError>;
}

/// Bookkeeping shared by every cacheable type: identity, pin count, lock, dirty flag.
#[derive(Debug)]
pub struct CacheState {
    identity: ObjectId,
    ref_count: AtomicU32,
    lock: LockHandle,
    dirty: AtomicBool,
}

impl CacheState {
    pub fn new(identity: ObjectId) -> Self {
        Self::with_lock_timeout(identity, None)
    }

    pub fn with_lock_timeout(identity: ObjectId, timeout: Option<Duration>) -> Self {
        Self {
            identity,
            ref_count: AtomicU32::new(0),
            lock: ObjectLock::new_handle(timeout),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> ObjectId {
        self.identity
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn increment_ref_count(&self) -> u32 {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn decrement_ref_count(&self) -> u32 {
        match self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => {
                warn!(
                    "object {}: reference count decremented below zero",
                    self.identity
                );
                0
            }
        }
    }

    pub fn set_ref_count(&self, count: u32) {
        self.ref_count.store(count, Ordering::Release);
    }

    pub fn lock(&self) -> &LockHandle {
        &self.lock
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }
}
