// ==============================================
// TRANSACTION LEDGER TESTS (integration)
// ==============================================

use crate::common::builders::small_store_config;
use crate::common::logger::init_test_logger;
use crate::{assert_err, assert_ok};
use arbor::common::config::TxnId;
use arbor::common::db_instance::DBInstance;
use arbor::common::exception::{DBError, LockError, TransactionError};
use arbor::concurrency::lock_manager::{LockHandle, LockMode, ObjectLock};
use arbor::concurrency::transaction::{Transaction, TransactionListener, TransactionState};
use arbor::concurrency::transaction_manager::TransactionManager;
use arbor::storage::cache::Cacheable;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct CountingListener {
    commits: AtomicUsize,
    aborts: AtomicUsize,
}

impl TransactionListener for CountingListener {
    fn commit(&self, _txn_id: TxnId) {
        self.commits.fetch_add(1, Ordering::SeqCst);
    }

    fn abort(&self, _txn_id: TxnId) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records the order listeners were invoked in.
struct OrderedListener {
    tag: usize,
    log: Arc<Mutex<Vec<usize>>>,
}

impl TransactionListener for OrderedListener {
    fn commit(&self, _txn_id: TxnId) {
        self.log.lock().push(self.tag);
    }

    fn abort(&self, _txn_id: TxnId) {
        self.log.lock().push(self.tag);
    }
}

mod ledger {
    use super::*;

    #[test]
    fn test_release_all_runs_in_reverse_acquisition_order() {
        init_test_logger();
        let manager = TransactionManager::new();
        let mut txn = assert_ok!(manager.begin());
        let locks: Vec<LockHandle> = (0..3).map(|_| ObjectLock::new_handle(None)).collect();
        for lock in &locks {
            assert_ok!(txn.acquire_lock(Arc::clone(lock), LockMode::Write));
        }

        let released = txn.release_all();
        assert_eq!(released.len(), 3);
        assert!(Arc::ptr_eq(released[0].lock(), &locks[2]));
        assert!(Arc::ptr_eq(released[1].lock(), &locks[1]));
        assert!(Arc::ptr_eq(released[2].lock(), &locks[0]));
        assert!(txn.held_locks().is_empty());
        assert!(locks.iter().all(|l| !l.is_locked()));
    }

    #[test]
    fn test_listeners_fire_once_in_registration_order() {
        init_test_logger();
        let manager = TransactionManager::new();
        let mut txn = assert_ok!(manager.begin());
        let log = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(CountingListener::default());
        for tag in 0..3 {
            assert_ok!(txn.register_listener(Arc::new(OrderedListener {
                tag,
                log: Arc::clone(&log),
            })));
        }
        assert_ok!(txn.register_listener(counter.clone()));

        assert_ok!(txn.commit());
        assert!(txn.commit().is_err());
        assert!(txn.abort().is_err());
        assert_ok!(txn.close());

        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert_eq!(counter.commits.load(Ordering::SeqCst), 1);
        assert_eq!(counter.aborts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_closing_a_started_transaction_aborts_it() {
        init_test_logger();
        let manager = TransactionManager::new();
        let lock = ObjectLock::new_handle(None);
        let counter = Arc::new(CountingListener::default());
        let mut txn = assert_ok!(manager.begin());
        assert_ok!(txn.acquire_lock(Arc::clone(&lock), LockMode::Read));
        assert_ok!(txn.register_listener(counter.clone()));

        assert_ok!(txn.close());
        assert_eq!(txn.get_state(), TransactionState::Closed);
        assert_eq!(counter.aborts.load(Ordering::SeqCst), 1);
        assert!(!lock.is_locked());
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_finished_transaction_rejects_new_locks() {
        let lock = ObjectLock::new_handle(None);
        let mut txn = Transaction::new(1);
        assert_ok!(txn.abort());
        let err = assert_err!(txn.register_lock(Arc::clone(&lock), LockMode::Read));
        assert!(matches!(
            err,
            TransactionError::InvalidState {
                state: TransactionState::Aborted,
                ..
            }
        ));
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_register_then_deregister_leaves_lock_held() {
        let lock = ObjectLock::new_handle(None);
        assert!(lock.try_acquire(LockMode::Write));
        let mut txn = Transaction::new(2);
        assert_ok!(txn.register_lock(Arc::clone(&lock), LockMode::Write));
        txn.deregister_lock(&lock, LockMode::Write);

        assert!(txn.held_locks().is_empty());
        assert_ok!(txn.commit());
        assert!(lock.is_write_locked());
        assert_ok!(lock.release(LockMode::Write));
    }

    #[test]
    #[should_panic(expected = "never registered")]
    fn test_deregister_of_unknown_ticket_panics() {
        let lock = ObjectLock::new_handle(None);
        let mut txn = Transaction::new(3);
        assert_ok!(txn.register_lock(Arc::clone(&lock), LockMode::Read));
        txn.deregister_lock(&lock, LockMode::Write);
    }

    #[test]
    fn test_dropping_transaction_releases_its_locks() {
        init_test_logger();
        let manager = TransactionManager::new();
        let lock = ObjectLock::new_handle(None);
        {
            let mut txn = assert_ok!(manager.begin());
            assert_ok!(txn.acquire_lock(Arc::clone(&lock), LockMode::Write));
            assert_eq!(manager.active_count(), 1);
        }
        assert!(!lock.is_locked());
        assert_eq!(manager.active_count(), 0);
    }
}

mod blocking {
    use super::*;

    #[test]
    fn test_blocked_writer_wakes_after_commit() {
        init_test_logger();
        let manager = Arc::new(TransactionManager::new());
        let lock = ObjectLock::new_handle(None);
        let mut holder = assert_ok!(manager.begin());
        assert_ok!(holder.acquire_lock(Arc::clone(&lock), LockMode::Read));

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let manager = Arc::clone(&manager);
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let mut txn = assert_ok!(manager.begin());
                assert_ok!(txn.acquire_lock(lock, LockMode::Write));
                tx.send(()).unwrap();
                assert_ok!(txn.commit());
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_ok!(holder.commit());
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        waiter.join().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_commit_from_coordinating_thread() {
        init_test_logger();
        let lock = ObjectLock::new_handle(None);
        let mut txn = Transaction::new(10);
        assert_ok!(txn.acquire_lock(Arc::clone(&lock), LockMode::Write));

        let finished = thread::spawn(move || {
            assert_ok!(txn.commit());
            txn
        })
        .join()
        .unwrap();
        assert_eq!(finished.get_state(), TransactionState::Committed);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_timeout_leaves_transaction_started() {
        init_test_logger();
        let mut config = small_store_config(4);
        config.lock.acquire_timeout_ms = Some(20);
        let db = assert_ok!(DBInstance::new(config));
        let root = assert_ok!(db.create_collection(1, "/db"));

        let mut owner = assert_ok!(db.begin_transaction());
        assert_ok!(db.lock_collection(&mut owner, &root, LockMode::Write));

        let mut other = assert_ok!(db.begin_transaction());
        let err = assert_err!(db.lock_collection(&mut other, &root, LockMode::Read));
        assert!(matches!(
            err,
            DBError::Transaction(TransactionError::Lock(LockError::Timeout {
                mode: LockMode::Read,
                ..
            }))
        ));
        assert_eq!(other.get_state(), TransactionState::Started);
        assert!(other.held_locks().is_empty());

        assert_ok!(owner.commit());
        assert_ok!(db.lock_collection(&mut other, &root, LockMode::Read));
        assert_eq!(root.lock().reader_count(), 1);
        assert_ok!(other.commit());
        db.release_collection(&root);
    }

    #[test]
    fn test_interrupted_waiter_records_nothing() {
        init_test_logger();
        let lock = ObjectLock::new_handle(None);
        assert!(lock.try_acquire(LockMode::Write));

        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let mut txn = Transaction::new(20);
                let result = txn.acquire_lock(lock, LockMode::Write);
                (result, txn.held_locks().len())
            })
        };
        // Keep interrupting until the waiter has registered and given up.
        while !waiter.is_finished() {
            lock.interrupt_waiters();
            thread::sleep(Duration::from_millis(5));
        }
        let (result, held) = waiter.join().unwrap();
        assert!(matches!(
            result,
            Err(TransactionError::Lock(LockError::Interrupted { .. }))
        ));
        assert_eq!(held, 0);
        assert_ok!(lock.release(LockMode::Write));
    }
}
