use crate::common::config::ObjectId;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// Fewer evictions than this are too little evidence to ask for growth.
const MIN_EVICTIONS_FOR_GROWTH: u64 = 8;

/// Identities evicted recently, bounded to a window.
#[derive(Debug, Default)]
struct EvictionWindow {
    order: VecDeque<ObjectId>,
    members: HashSet<ObjectId>,
    limit: usize,
}

impl EvictionWindow {
    fn push(&mut self, id: ObjectId) {
        if self.limit == 0 || !self.members.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.limit {
            if let Some(old) = self.order.pop_front() {
                self.members.remove(&old);
            }
        }
    }

    fn take(&mut self, id: ObjectId) -> bool {
        if self.members.remove(&id) {
            self.order.retain(|&other| other != id);
            true
        } else {
            false
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

/// Hit/miss/eviction counters plus thrashing detection for one cache.
///
/// An object counts as *thrashing* when it is added again shortly after being
/// evicted: the cache is too small for its working set.
#[derive(Debug)]
pub struct Accounting {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    thrashing: AtomicU64,
    /// Evictions and thrashing since the last growth decision.
    window_evictions: AtomicU64,
    window_thrashing: AtomicU64,
    recently_evicted: Mutex<EvictionWindow>,
}

impl Accounting {
    pub fn new(window: usize) -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            thrashing: AtomicU64::new(0),
            window_evictions: AtomicU64::new(0),
            window_thrashing: AtomicU64::new(0),
            recently_evicted: Mutex::new(EvictionWindow {
                limit: window,
                ..EvictionWindow::default()
            }),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self, id: ObjectId) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.window_evictions.fetch_add(1, Ordering::Relaxed);
        self.recently_evicted.lock().push(id);
    }

    /// Called for every newly cached identity.
    pub fn record_insert(&self, id: ObjectId) {
        if self.recently_evicted.lock().take(id) {
            self.thrashing.fetch_add(1, Ordering::Relaxed);
            self.window_thrashing.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn thrashing(&self) -> u64 {
        self.thrashing.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// True when enough of the recent evictions came straight back.
    pub fn should_grow(&self, threshold: f64) -> bool {
        let evictions = self.window_evictions.load(Ordering::Relaxed);
        if evictions < MIN_EVICTIONS_FOR_GROWTH {
            return false;
        }
        let thrashing = self.window_thrashing.load(Ordering::Relaxed);
        thrashing as f64 / evictions as f64 > threshold
    }

    /// Starts a fresh observation window, e.g. after the cache was resized.
    pub fn reset_window(&self, window: usize) {
        self.window_evictions.store(0, Ordering::Relaxed);
        self.window_thrashing.store(0, Ordering::Relaxed);
        let mut recent = self.recently_evicted.lock();
        recent.clear();
        recent.limit = window;
    }
}
