use crate::common::config::TxnId;
use crate::common::exception::TransactionError;
use crate::concurrency::lock_manager::{LockHandle, LockMode};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Transaction state.
///
/// `Started -> {Committed, Aborted} -> Closed`; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Started,
    Committed,
    Aborted,
    Closed,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Started => "STARTED",
            TransactionState::Committed => "COMMITTED",
            TransactionState::Aborted => "ABORTED",
            TransactionState::Closed => "CLOSED",
        };
        write!(f, "{}", name)
    }
}

/// Callback notified when a transaction finishes.
///
/// Hooks run synchronously on the thread calling `commit`/`abort` and must not
/// block indefinitely.
pub trait TransactionListener: Send + Sync {
    fn commit(&self, txn_id: TxnId);
    fn abort(&self, txn_id: TxnId);
}

/// One lock acquisition recorded by a transaction.
#[derive(Clone)]
pub struct LockTicket {
    lock: LockHandle,
    mode: LockMode,
}

impl LockTicket {
    pub fn new(lock: LockHandle, mode: LockMode) -> Self {
        Self { lock, mode }
    }

    pub fn lock(&self) -> &LockHandle {
        &self.lock
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Locks are compared by identity, not by state.
    pub fn matches(&self, lock: &LockHandle, mode: LockMode) -> bool {
        Arc::ptr_eq(&self.lock, lock) && self.mode == mode
    }
}

impl fmt::Debug for LockTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockTicket")
            .field("lock", &Arc::as_ptr(&self.lock))
            .field("mode", &self.mode)
            .finish()
    }
}

/// Ledger of the locks held by one in-flight transaction.
///
/// A transaction is driven by a single owner at a time, hence `&mut self`
/// everywhere; it is `Send` so a coordinating thread may finish it.
pub struct Transaction {
    txn_id: TxnId,
    state: TransactionState,
    held_locks: Vec<LockTicket>,
    listeners: Vec<Arc<dyn TransactionListener>>,
    registry: Option<Arc<Mutex<HashSet<TxnId>>>>,
}

impl Transaction {
    /// Creates a free-standing transaction in the `Started` state.
    pub fn new(txn_id: TxnId) -> Self {
        Self {
            txn_id,
            state: TransactionState::Started,
            held_locks: Vec::new(),
            listeners: Vec::new(),
            registry: None,
        }
    }

    /// Creates a transaction that removes itself from `registry` when closed.
    pub(crate) fn with_registry(txn_id: TxnId, registry: Arc<Mutex<HashSet<TxnId>>>) -> Self {
        let mut txn = Self::new(txn_id);
        txn.registry = Some(registry);
        txn
    }

    /// Returns the ID of this transaction.
    pub fn id(&self) -> TxnId {
        self.txn_id
    }

    /// Returns the transaction state.
    pub fn get_state(&self) -> TransactionState {
        self.state
    }

    /// Tickets in acquisition order.
    pub fn held_locks(&self) -> &[LockTicket] {
        &self.held_locks
    }

    pub fn holds(&self, lock: &LockHandle, mode: LockMode) -> bool {
        self.held_locks.iter().any(|t| t.matches(lock, mode))
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn ensure_started(&self, operation: &'static str) -> Result<(), TransactionError> {
        if self.state == TransactionState::Started {
            Ok(())
        } else {
            Err(TransactionError::InvalidState {
                txn_id: self.txn_id,
                state: self.state,
                operation,
            })
        }
    }

    /// Records a lock that was already acquired through another path.
    pub fn register_lock(
        &mut self,
        lock: LockHandle,
        mode: LockMode,
    ) -> Result<(), TransactionError> {
        self.ensure_started("register a lock")?;
        self.held_locks.push(LockTicket::new(lock, mode));
        Ok(())
    }

    /// Blocks until `lock` is granted in `mode`, then records it.
    ///
    /// # Errors
    /// Propagates the lock error if blocking acquisition fails; nothing is recorded
    /// in that case and the transaction stays `Started`.
    pub fn acquire_lock(
        &mut self,
        lock: LockHandle,
        mode: LockMode,
    ) -> Result<(), TransactionError> {
        self.ensure_started("acquire a lock")?;
        lock.acquire(mode)?;
        debug!("txn {} acquired {} lock", self.txn_id, mode);
        self.held_locks.push(LockTicket::new(lock, mode));
        Ok(())
    }

    /// Forgets the most recent ticket matching `lock`/`mode` without releasing it.
    ///
    /// # Panics
    /// If no such ticket exists: the caller and the ledger disagree about what is held.
    pub fn deregister_lock(&mut self, lock: &LockHandle, mode: LockMode) {
        match self.held_locks.iter().rposition(|t| t.matches(lock, mode)) {
            Some(pos) => {
                self.held_locks.remove(pos);
            }
            None => panic!(
                "txn {}: deregister of {} lock {:p} that was never registered",
                self.txn_id,
                mode,
                Arc::as_ptr(lock)
            ),
        }
    }

    /// Releases every held lock, most recently acquired first, and empties the ledger.
    ///
    /// # Returns
    /// The released tickets in the order they were released.
    pub fn release_all(&mut self) -> Vec<LockTicket> {
        let mut tickets = std::mem::take(&mut self.held_locks);
        tickets.reverse();
        for ticket in &tickets {
            if let Err(e) = ticket.lock.release(ticket.mode) {
                error!("txn {}: failed to release lock: {}", self.txn_id, e);
            }
        }
        if !tickets.is_empty() {
            debug!("txn {} released {} locks", self.txn_id, tickets.len());
        }
        tickets
    }

    pub fn register_listener(
        &mut self,
        listener: Arc<dyn TransactionListener>,
    ) -> Result<(), TransactionError> {
        self.ensure_started("register a listener")?;
        self.listeners.push(listener);
        Ok(())
    }

    /// Marks the transaction committed, notifies listeners in registration order and
    /// releases all held locks.
    pub fn commit(&mut self) -> Result<(), TransactionError> {
        self.ensure_started("commit")?;
        self.state = TransactionState::Committed;
        for listener in &self.listeners {
            listener.commit(self.txn_id);
        }
        let released = self.release_all();
        info!("txn {} committed, released {} locks", self.txn_id, released.len());
        Ok(())
    }

    /// Marks the transaction aborted, notifies listeners in registration order and
    /// releases all held locks.
    pub fn abort(&mut self) -> Result<(), TransactionError> {
        self.ensure_started("abort")?;
        self.state = TransactionState::Aborted;
        for listener in &self.listeners {
            listener.abort(self.txn_id);
        }
        let released = self.release_all();
        info!("txn {} aborted, released {} locks", self.txn_id, released.len());
        Ok(())
    }

    /// Moves the transaction to `Closed`, aborting it first if it never finished.
    pub fn close(&mut self) -> Result<(), TransactionError> {
        match self.state {
            TransactionState::Closed => {
                return Err(TransactionError::InvalidState {
                    txn_id: self.txn_id,
                    state: self.state,
                    operation: "close",
                })
            }
            TransactionState::Started => {
                warn!("txn {} closed without commit, aborting", self.txn_id);
                self.abort()?;
            }
            TransactionState::Committed | TransactionState::Aborted => {}
        }
        self.state = TransactionState::Closed;
        self.listeners.clear();
        if let Some(registry) = self.registry.take() {
            registry.lock().remove(&self.txn_id);
        }
        debug!("txn {} closed", self.txn_id);
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state != TransactionState::Closed {
            if let Err(e) = self.close() {
                error!("txn {}: close on drop failed: {}", self.txn_id, e);
            }
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("txn_id", &self.txn_id)
            .field("state", &self.state)
            .field("held_locks", &self.held_locks)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
