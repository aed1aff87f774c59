use crate::common::exception::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub type ObjectId = u64; // identity of a cached object
pub type TxnId = u64; // transaction id type

pub const INVALID_OBJECT_ID: ObjectId = u64::MAX; // invalid object id
pub const INVALID_TXN_ID: TxnId = u64::MAX; // invalid transaction id
pub const TXN_START_ID: TxnId = 1; // first txn id

pub const DEFAULT_CACHE_CAPACITY: usize = 64; // initial number of cached collections
pub const DEFAULT_MAX_CACHE_CAPACITY: usize = 4096; // hard ceiling for a single cache
pub const DEFAULT_MAX_TOTAL_CAPACITY: usize = 16384; // budget shared by all caches

/// Number of full LRU scans an eviction pass makes before reporting no progress.
pub const EVICTION_ATTEMPTS: usize = 3;

/// Capacity multiplier applied when a cache is granted more room.
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.5;

/// Share of recent evictions that were added straight back, above which a cache asks to grow.
pub const DEFAULT_GROWTH_THRESHOLD: f64 = 0.25;

/// A 64-bit varint never needs more than 10 bytes.
pub const MAX_VARINT_LEN: usize = 10;

/// Cache sizing and eviction knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub max_capacity: usize,
    pub growth_factor: f64,
    pub growth_threshold: f64,
    pub eviction_attempts: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            max_capacity: DEFAULT_MAX_CACHE_CAPACITY,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            growth_threshold: DEFAULT_GROWTH_THRESHOLD,
            eviction_attempts: EVICTION_ATTEMPTS,
        }
    }
}

/// Global budget handed out by the cache manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_total_capacity: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_total_capacity: DEFAULT_MAX_TOTAL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// `None` waits forever on blocking acquisition.
    pub acquire_timeout_ms: Option<u64>,
}

impl LockConfig {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

/// Top-level configuration of one storage instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub collection_cache: CacheConfig,
    pub budget: BudgetConfig,
    pub lock: LockConfig,
    pub log_level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            collection_cache: CacheConfig::default(),
            budget: BudgetConfig::default(),
            lock: LockConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl StoreConfig {
    /// Loads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the cache engine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cache = &self.collection_cache;
        if cache.capacity == 0 {
            return Err(ConfigError::Invalid(
                "collection_cache.capacity must be at least 1".to_string(),
            ));
        }
        if cache.capacity > cache.max_capacity {
            return Err(ConfigError::Invalid(format!(
                "collection_cache.capacity {} exceeds max_capacity {}",
                cache.capacity, cache.max_capacity
            )));
        }
        if cache.growth_factor <= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "collection_cache.growth_factor must be greater than 1.0, got {}",
                cache.growth_factor
            )));
        }
        if cache.eviction_attempts == 0 {
            return Err(ConfigError::Invalid(
                "collection_cache.eviction_attempts must be at least 1".to_string(),
            ));
        }
        if cache.capacity > self.budget.max_total_capacity {
            return Err(ConfigError::Invalid(format!(
                "collection_cache.capacity {} exceeds budget.max_total_capacity {}",
                cache.capacity, self.budget.max_total_capacity
            )));
        }
        Ok(())
    }
}
