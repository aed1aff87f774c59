//! Storage core of a hierarchical document store: a lock-aware LRU object cache
//! with a name index, a transaction lock ledger, and the variable-byte codec the
//! cached structures are persisted with.

pub mod common;
pub mod concurrency;
pub mod storage;
