use crate::common::config::{ObjectId, TxnId};
use crate::concurrency::lock_manager::LockMode;
use crate::concurrency::transaction::TransactionState;
use std::string::FromUtf8Error;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for {mode} lock")]
    Timeout { mode: LockMode, waited: Duration },
    #[error("interrupted while waiting for {mode} lock")]
    Interrupted { mode: LockMode },
    #[error("attempted to release a {mode} lock that is not held")]
    NotHeld { mode: LockMode },
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("transaction {txn_id} cannot {operation} in state {state}")]
    InvalidState {
        txn_id: TxnId,
        state: TransactionState,
        operation: &'static str,
    },
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("transaction manager is shut down")]
    Shutdown,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache {cache} is full ({len}/{capacity}) and no entry could be evicted")]
    CapacityExhausted {
        cache: String,
        capacity: usize,
        len: usize,
    },
    #[error("cache budget exceeded: requested {requested}, available {available}")]
    BudgetExceeded { requested: usize, available: usize },
    #[error("failed to flush object {id}: {reason}")]
    Flush { id: ObjectId, reason: String },
}

/// Failures while decoding variable-byte data.
///
/// `EndOfData` means the input was exhausted exactly at a value boundary; whether
/// that is an error depends on the caller. `Truncated` means a value (or a declared
/// count of values) started but the bytes ran out part way.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("end of data")]
    EndOfData,
    #[error("truncated input: needed {needed} more bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("varint does not fit in a {width}-bit value")]
    VarIntOverflow { width: u32 },
    #[error("invalid UTF-8 in string: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),
    #[error("declared {declared} values but found {found}")]
    CountMismatch { declared: usize, found: usize },
}

impl CodecError {
    /// Inside a count-prefixed list running out of bytes is never a clean end.
    pub fn into_truncated(self) -> Self {
        match self {
            CodecError::EndOfData => CodecError::Truncated {
                needed: 1,
                available: 0,
            },
            other => other,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level error for operations on a storage instance.
#[derive(Error, Debug)]
pub enum DBError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}
