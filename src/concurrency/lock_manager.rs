use crate::common::exception::LockError;
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared handle to an object lock. Tickets and cacheables hold clones of it.
pub type LockHandle = Arc<ObjectLock>;

/// Shared/exclusive access mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockMode {
    Read,
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => write!(f, "read"),
            LockMode::Write => write!(f, "write"),
        }
    }
}

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
    waiting_writers: usize,
    /// Bumped by `interrupt_waiters`; a waiter that sees it change gives up.
    interrupt_epoch: u64,
}

impl LockState {
    fn can_grant(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Read => !self.writer && self.waiting_writers == 0,
            LockMode::Write => !self.writer && self.readers == 0,
        }
    }

    fn grant(&mut self, mode: LockMode) {
        match mode {
            LockMode::Read => self.readers += 1,
            LockMode::Write => self.writer = true,
        }
    }
}

/// Reader/writer lock guarding one cached object.
///
/// Multiple readers or a single writer may hold it; readers and writers never
/// overlap. Acquisition comes in two distinct flavours: [`ObjectLock::try_acquire`]
/// never blocks and is the only form the cache evictor may use, while
/// [`ObjectLock::acquire`] blocks (optionally bounded by a timeout) and is what
/// transactions use. Waiting writers take precedence over newly arriving readers.
///
/// The lock is not reentrant and not tied to a thread: whoever acquired a mode
/// is responsible for releasing it, possibly from another thread.
pub struct ObjectLock {
    state: Mutex<LockState>,
    cv: Condvar,
    timeout: Option<Duration>,
}

impl ObjectLock {
    /// Creates a lock whose blocking acquisition waits indefinitely.
    pub fn new() -> Self {
        Self::with_timeout(None)
    }

    /// Creates a lock whose blocking acquisition gives up after `timeout`.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            cv: Condvar::new(),
            timeout,
        }
    }

    /// Convenience constructor returning a shareable handle.
    pub fn new_handle(timeout: Option<Duration>) -> LockHandle {
        Arc::new(Self::with_timeout(timeout))
    }

    /// Attempts to take the lock in `mode` without blocking.
    ///
    /// # Returns
    /// `true` if the lock was granted.
    pub fn try_acquire(&self, mode: LockMode) -> bool {
        let mut state = self.state.lock();
        if state.can_grant(mode) {
            state.grant(mode);
            trace!("try_acquire({}) granted", mode);
            true
        } else {
            trace!("try_acquire({}) refused", mode);
            false
        }
    }

    /// Blocks until the lock is granted in `mode`.
    ///
    /// # Errors
    /// - `LockError::Timeout` if the configured timeout elapses first.
    /// - `LockError::Interrupted` if [`ObjectLock::interrupt_waiters`] is called while waiting.
    pub fn acquire(&self, mode: LockMode) -> Result<(), LockError> {
        let started = Instant::now();
        let deadline = self.timeout.map(|t| started + t);
        let mut state = self.state.lock();

        if state.can_grant(mode) {
            state.grant(mode);
            return Ok(());
        }

        let epoch = state.interrupt_epoch;
        if mode == LockMode::Write {
            state.waiting_writers += 1;
        }

        // A waiting writer must not be held back by its own registration.
        let grantable = |state: &LockState| match mode {
            LockMode::Write => !state.writer && state.readers == 0,
            LockMode::Read => state.can_grant(mode),
        };

        let result = loop {
            if state.interrupt_epoch != epoch {
                break Err(LockError::Interrupted { mode });
            }
            if grantable(&*state) {
                break Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if self.cv.wait_until(&mut state, deadline).timed_out() {
                        if state.interrupt_epoch != epoch {
                            break Err(LockError::Interrupted { mode });
                        }
                        if grantable(&*state) {
                            break Ok(());
                        }
                        break Err(LockError::Timeout {
                            mode,
                            waited: started.elapsed(),
                        });
                    }
                }
                None => self.cv.wait(&mut state),
            }
        };

        if mode == LockMode::Write {
            state.waiting_writers -= 1;
        }
        match result {
            Ok(()) => {
                state.grant(mode);
                debug!("acquired {} lock after {:?}", mode, started.elapsed());
                Ok(())
            }
            Err(err) => {
                // Readers held back by this writer may now proceed.
                drop(state);
                self.cv.notify_all();
                warn!("blocking {} lock acquisition failed: {}", mode, err);
                Err(err)
            }
        }
    }

    /// Releases one hold of `mode`.
    ///
    /// # Errors
    /// `LockError::NotHeld` if no such hold exists.
    pub fn release(&self, mode: LockMode) -> Result<(), LockError> {
        let mut state = self.state.lock();
        match mode {
            LockMode::Read if state.readers > 0 => state.readers -= 1,
            LockMode::Write if state.writer => state.writer = false,
            _ => return Err(LockError::NotHeld { mode }),
        }
        drop(state);
        self.cv.notify_all();
        Ok(())
    }

    /// Wakes every blocked `acquire` call with `LockError::Interrupted`.
    pub fn interrupt_waiters(&self) {
        let mut state = self.state.lock();
        state.interrupt_epoch = state.interrupt_epoch.wrapping_add(1);
        drop(state);
        self.cv.notify_all();
    }

    pub fn is_locked(&self) -> bool {
        let state = self.state.lock();
        state.writer || state.readers > 0
    }

    pub fn is_write_locked(&self) -> bool {
        self.state.lock().writer
    }

    pub fn reader_count(&self) -> usize {
        self.state.lock().readers
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Default for ObjectLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ObjectLock")
            .field("readers", &state.readers)
            .field("writer", &state.writer)
            .field("waiting_writers", &state.waiting_writers)
            .field("timeout", &self.timeout)
            .finish()
    }
}
