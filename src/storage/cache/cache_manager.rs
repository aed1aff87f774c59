use crate::common::config::BudgetConfig;
use crate::common::exception::CacheError;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Shared capacity budget across every registered cache.
///
/// Caches ask the manager before growing; the manager never calls back into a
/// cache, so taking its lock while a cache lock is held cannot deadlock.
#[derive(Debug)]
pub struct CacheManager {
    max_total_capacity: usize,
    allocations: Mutex<HashMap<String, usize>>,
}

impl CacheManager {
    pub fn new(config: &BudgetConfig) -> Self {
        Self::with_max_total(config.max_total_capacity)
    }

    pub fn with_max_total(max_total_capacity: usize) -> Self {
        info!(
            "Cache manager initialized with total capacity {}",
            max_total_capacity
        );
        Self {
            max_total_capacity,
            allocations: Mutex::new(HashMap::new()),
        }
    }

    /// Claims `capacity` slots for the cache called `name`.
    ///
    /// # Returns
    /// - `Ok(())` if the budget could hold the capacity.
    /// - `Err(CacheError::BudgetExceeded)` otherwise; nothing is recorded.
    pub fn register(&self, name: &str, capacity: usize) -> Result<(), CacheError> {
        let mut allocations = self.allocations.lock();
        let previous = allocations.get(name).copied().unwrap_or(0);
        let available = self.available(&allocations) + previous;
        if capacity > available {
            return Err(CacheError::BudgetExceeded {
                requested: capacity,
                available,
            });
        }
        allocations.insert(name.to_string(), capacity);
        debug!("Registered cache '{}' with capacity {}", name, capacity);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Option<usize> {
        let released = self.allocations.lock().remove(name);
        if let Some(capacity) = released {
            debug!("Unregistered cache '{}' ({} slots returned)", name, capacity);
        }
        released
    }

    /// Asks to grow `name` from `current` to `desired` slots.
    ///
    /// Grants as much of the increase as the budget allows.
    ///
    /// # Returns
    /// The new capacity, or `None` if nothing could be granted.
    pub fn request_growth(&self, name: &str, current: usize, desired: usize) -> Option<usize> {
        if desired <= current {
            return None;
        }
        let mut allocations = self.allocations.lock();
        let allocated = allocations.get(name).copied().unwrap_or(0);
        let available = self.available(&allocations) + allocated.saturating_sub(current);
        if available == 0 {
            warn!(
                "Cache '{}' asked to grow to {} but the budget is exhausted",
                name, desired
            );
            return None;
        }
        let granted = desired.min(current + available);
        allocations.insert(name.to_string(), granted);
        info!("Cache '{}' grown from {} to {}", name, current, granted);
        Some(granted)
    }

    /// All-or-nothing variant of [`request_growth`](Self::request_growth).
    pub fn reserve(&self, name: &str, current: usize, desired: usize) -> Result<(), CacheError> {
        if desired <= current {
            return Ok(());
        }
        let mut allocations = self.allocations.lock();
        let allocated = allocations.get(name).copied().unwrap_or(0);
        let available = self.available(&allocations) + allocated.saturating_sub(current);
        let requested = desired - current;
        if requested > available {
            return Err(CacheError::BudgetExceeded {
                requested,
                available,
            });
        }
        allocations.insert(name.to_string(), desired);
        Ok(())
    }

    /// Records that `name` now only uses `capacity` slots.
    pub fn release(&self, name: &str, capacity: usize) {
        let mut allocations = self.allocations.lock();
        if let Some(allocated) = allocations.get_mut(name) {
            if capacity < *allocated {
                debug!(
                    "Cache '{}' released {} slots",
                    name,
                    *allocated - capacity
                );
                *allocated = capacity;
            }
        }
    }

    pub fn capacity_of(&self, name: &str) -> Option<usize> {
        self.allocations.lock().get(name).copied()
    }

    pub fn total_capacity(&self) -> usize {
        self.allocations.lock().values().sum()
    }

    pub fn remaining(&self) -> usize {
        self.available(&self.allocations.lock())
    }

    pub fn max_total_capacity(&self) -> usize {
        self.max_total_capacity
    }

    fn available(&self, allocations: &HashMap<String, usize>) -> usize {
        self.max_total_capacity
            .saturating_sub(allocations.values().sum::<usize>())
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(&BudgetConfig::default())
    }
}
