use crate::common::config::ObjectId;
use crate::common::exception::{CacheError, CodecError};
use crate::storage::cache::cacheable::{Cacheable, FlushHook, NamedCacheable};
use crate::storage::collection::Collection;
use bytes::Bytes;
use log::{debug, trace};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<ObjectId, Bytes>,
    names: HashMap<String, ObjectId>,
}

/// Encoded collection records keyed by identity.
///
/// Stands in for the page-level persistence layer: it only ever sees bytes
/// produced by [`Collection::to_bytes`] and hands them back for decoding on a
/// cache miss. Acts as the collection cache's [`FlushHook`].
#[derive(Debug, Default)]
pub struct CollectionStore {
    state: RwLock<StoreState>,
    read_only: AtomicBool,
}

impl CollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists the current state of `collection`.
    pub fn write(&self, collection: &Collection) -> Result<(), CacheError> {
        if self.read_only.load(Ordering::Acquire) {
            return Err(CacheError::Flush {
                id: collection.identity(),
                reason: "collection store is read-only".to_string(),
            });
        }
        let bytes = collection.to_bytes();
        let id = collection.identity();
        let name = collection.name();
        trace!("Storing collection {} ('{}'), {} bytes", id, name, bytes.len());

        let mut state = self.state.write();
        state.names.retain(|_, existing| *existing != id);
        state.names.insert(name, id);
        state.records.insert(id, bytes);
        Ok(())
    }

    /// Stores raw encoded bytes, e.g. records being migrated from elsewhere.
    pub fn put_raw(&self, id: ObjectId, name: impl Into<String>, bytes: Bytes) {
        let mut state = self.state.write();
        state.names.insert(name.into(), id);
        state.records.insert(id, bytes);
    }

    pub fn read_raw(&self, id: ObjectId) -> Option<Bytes> {
        self.state.read().records.get(&id).cloned()
    }

    /// Decodes the stored record for `id`.
    ///
    /// # Returns
    /// - `Ok(None)` if nothing is stored under `id`.
    /// - `Err(CodecError)` if the stored bytes are corrupt.
    pub fn load(
        &self,
        id: ObjectId,
        lock_timeout: Option<Duration>,
    ) -> Result<Option<Collection>, CodecError> {
        let Some(bytes) = self.read_raw(id) else {
            return Ok(None);
        };
        debug!("Loading collection {} from store ({} bytes)", id, bytes.len());
        Collection::from_bytes(bytes, lock_timeout).map(Some)
    }

    pub fn find_by_name(&self, name: &str) -> Option<ObjectId> {
        self.state.read().names.get(name).copied()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.state.read().records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every subsequent write fail, which keeps dirty collections cached.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }
}

impl FlushHook<Collection> for CollectionStore {
    fn flush(&self, collection: &Collection) -> Result<(), CacheError> {
        self.write(collection)
    }
}
