use crate::common::config::{TxnId, TXN_START_ID};
use crate::common::exception::TransactionError;
use crate::concurrency::transaction::Transaction;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Hands out transactions and keeps track of which are still open.
#[derive(Debug)]
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    active: Arc<Mutex<HashSet<TxnId>>>,
    is_shutdown: AtomicBool,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(TXN_START_ID),
            active: Arc::new(Mutex::new(HashSet::new())),
            is_shutdown: AtomicBool::new(false),
        }
    }

    /// Begins a new transaction in the `Started` state.
    ///
    /// # Errors
    /// `TransactionError::Shutdown` once [`TransactionManager::shutdown`] has been called.
    pub fn begin(&self) -> Result<Transaction, TransactionError> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(TransactionError::Shutdown);
        }
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        self.active.lock().insert(txn_id);
        debug!("began txn {}", txn_id);
        Ok(Transaction::with_registry(txn_id, Arc::clone(&self.active)))
    }

    /// Stops handing out transactions. Open ones remain usable until closed.
    pub fn shutdown(&self) -> usize {
        self.is_shutdown.store(true, Ordering::SeqCst);
        let open = self.active_count();
        if open > 0 {
            warn!("transaction manager shut down with {} open transactions", open);
        } else {
            info!("transaction manager shut down");
        }
        open
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_active(&self, txn_id: TxnId) -> bool {
        self.active.lock().contains(&txn_id)
    }

    /// Open transaction ids in ascending order.
    pub fn active_ids(&self) -> Vec<TxnId> {
        let mut ids: Vec<TxnId> = self.active.lock().iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
