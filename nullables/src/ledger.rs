//! Nullable ledger backend: in-memory height with scriptable failures.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use gatehouse_types::{CollaboratorError, LedgerBackend};

use crate::log::CallLog;

/// A ledger that stores nothing and reports a settable height.
#[derive(Debug, Default)]
pub struct NullLedger {
    height: AtomicU32,
    open: AtomicBool,
    disposed: AtomicBool,
    persist_calls: AtomicUsize,
    fail_open: AtomicBool,
    fail_persist: AtomicBool,
    fail_dispose: AtomicBool,
    log: CallLog,
}

impl NullLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record lifecycle calls into `log`.
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn set_height(&self, height: u32) {
        self.height.store(height, Ordering::SeqCst);
    }

    /// Make `open` fail from now on.
    pub fn fail_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    /// Make every `persist` call fail until cleared.
    pub fn set_fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    pub fn fail_dispose(&self) {
        self.fail_dispose.store(true, Ordering::SeqCst);
    }

    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl LedgerBackend for NullLedger {
    fn open(&self) -> Result<(), CollaboratorError> {
        self.log.record("ledger.open");
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Storage("ledger database is locked".into()));
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn persist(&self) -> Result<(), CollaboratorError> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Storage("write failed".into()));
        }
        Ok(())
    }

    fn height(&self) -> u32 {
        self.height.load(Ordering::SeqCst)
    }

    fn dispose(&self) -> Result<(), CollaboratorError> {
        self.log.record("ledger.dispose");
        self.open.store(false, Ordering::SeqCst);
        self.disposed.store(true, Ordering::SeqCst);
        if self.fail_dispose.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Storage("flush failed".into()));
        }
        Ok(())
    }
}
