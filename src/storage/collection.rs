use crate::common::config::ObjectId;
use crate::common::exception::CodecError;
use crate::concurrency::lock_manager::LockHandle;
use crate::storage::cache::cacheable::{CacheState, Cacheable, NamedCacheable};
use crate::storage::record::{CollectionRecord, EntryRecord};
use bytes::Bytes;
use log::trace;
use parking_lot::RwLock;
use std::fmt;
use std::time::Duration;

/// In-memory collection node, the unit the collection cache holds.
///
/// Every mutation marks the collection dirty so the cache flushes it before it
/// can be evicted.
pub struct Collection {
    state: CacheState,
    record: RwLock<CollectionRecord>,
}

impl Collection {
    pub fn new(id: ObjectId, name: impl Into<String>) -> Self {
        Self::from_record(CollectionRecord::new(id, name), None)
    }

    pub fn from_record(record: CollectionRecord, lock_timeout: Option<Duration>) -> Self {
        Self {
            state: CacheState::with_lock_timeout(record.id, lock_timeout),
            record: RwLock::new(record),
        }
    }

    pub fn from_bytes(
        data: impl Into<Bytes>,
        lock_timeout: Option<Duration>,
    ) -> Result<Self, CodecError> {
        let record = CollectionRecord::from_bytes(data)?;
        Ok(Self::from_record(record, lock_timeout))
    }

    pub fn to_bytes(&self) -> Bytes {
        self.record.read().to_bytes()
    }

    /// Snapshot of the persisted state.
    pub fn record(&self) -> CollectionRecord {
        self.record.read().clone()
    }

    /// Adds a child collection name. Returns `false` if it was already present.
    pub fn add_child(&self, child: impl Into<String>) -> bool {
        let child = child.into();
        let mut record = self.record.write();
        if record.children.iter().any(|c| *c == child) {
            return false;
        }
        trace!("collection {}: add child '{}'", record.id, child);
        record.children.push(child);
        self.state.set_dirty(true);
        true
    }

    pub fn remove_child(&self, child: &str) -> bool {
        let mut record = self.record.write();
        let before = record.children.len();
        record.children.retain(|c| c != child);
        let removed = record.children.len() != before;
        if removed {
            self.state.set_dirty(true);
        }
        removed
    }

    /// Adds or replaces the entry with the same id.
    pub fn add_entry(&self, entry: EntryRecord) -> Option<EntryRecord> {
        let mut record = self.record.write();
        self.state.set_dirty(true);
        match record.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => Some(std::mem::replace(existing, entry)),
            None => {
                record.entries.push(entry);
                None
            }
        }
    }

    pub fn remove_entry(&self, id: ObjectId) -> Option<EntryRecord> {
        let mut record = self.record.write();
        let position = record.entries.iter().position(|e| e.id == id)?;
        self.state.set_dirty(true);
        Some(record.entries.remove(position))
    }

    pub fn entry(&self, name: &str) -> Option<EntryRecord> {
        self.record
            .read()
            .entries
            .iter()
            .find(|e| e.name == name)
            .cloned()
    }

    pub fn set_permissions(&self, permissions: u32) {
        self.record.write().permissions = permissions;
        self.state.set_dirty(true);
    }

    pub fn permissions(&self) -> u32 {
        self.record.read().permissions
    }

    pub fn children(&self) -> Vec<String> {
        self.record.read().children.clone()
    }

    pub fn child_count(&self) -> usize {
        self.record.read().children.len()
    }

    pub fn entry_count(&self) -> usize {
        self.record.read().entries.len()
    }
}

impl Cacheable for Collection {
    fn identity(&self) -> ObjectId {
        self.state.identity()
    }

    fn ref_count(&self) -> u32 {
        self.state.ref_count()
    }

    fn increment_ref_count(&self) -> u32 {
        self.state.increment_ref_count()
    }

    fn decrement_ref_count(&self) -> u32 {
        self.state.decrement_ref_count()
    }

    fn set_ref_count(&self, count: u32) {
        self.state.set_ref_count(count)
    }

    fn lock(&self) -> &LockHandle {
        self.state.lock()
    }

    fn approx_size(&self) -> usize {
        let record = self.record.read();
        std::mem::size_of::<Self>()
            + record.name.len()
            + record.children.iter().map(String::len).sum::<usize>()
            + record.entries.iter().map(EntryRecord::approx_size).sum::<usize>()
    }

    fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    fn set_dirty(&self, dirty: bool) {
        self.state.set_dirty(dirty)
    }
}

impl NamedCacheable for Collection {
    fn name(&self) -> String {
        self.record.read().name.clone()
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.record.read();
        f.debug_struct("Collection")
            .field("id", &record.id)
            .field("name", &record.name)
            .field("children", &record.children.len())
            .field("entries", &record.entries.len())
            .field("ref_count", &self.state.ref_count())
            .field("dirty", &self.state.is_dirty())
            .finish()
    }
}
