//! # Object Cache
//!
//! Lock-aware LRU caching of shared storage objects.
//!
//! ```text
//!   CacheContainer<T, C>          RwLock "cache lock": shared for get, exclusive otherwise
//!        │
//!        ▼
//!   NamedCache<T>                 name → identity index kept in step with membership
//!        │
//!        ▼
//!   LruCache<T>                   entries + recency list + accounting
//!        │
//!        ├──► CacheManager         global capacity budget, consulted before growing
//!        └──► FlushHook<T>         persists dirty objects before eviction
//! ```
//!
//! Lock ordering: cache lock, then (non-blocking) object lock, then the manager's
//! budget lock. Nothing acquires them in the opposite direction.

pub mod accounting;
pub mod cache_manager;
pub mod cache_traits;
pub mod cacheable;
pub mod container;
pub mod lru;
pub mod named;

pub use cache_manager::CacheManager;
pub use cache_traits::{
    AddOutcome, CacheStats, EvictionOutcome, NamedObjectCache, ObjectCache, ResizeReport,
};
pub use cacheable::{CacheState, Cacheable, FlushHook, NamedCacheable};
pub use container::CacheContainer;
pub use lru::LruCache;
pub use named::NamedCache;
