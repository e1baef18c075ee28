//! Nullable wallet.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use gatehouse_types::{CollaboratorError, Wallet};

use crate::log::CallLog;

/// A wallet that counts processing passes and can be told to fail or panic.
#[derive(Debug, Default)]
pub struct NullWallet {
    process_calls: AtomicUsize,
    closed: AtomicBool,
    fail_process: AtomicBool,
    panic_process: AtomicBool,
    log: CallLog,
}

impl NullWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn set_fail_process(&self, fail: bool) {
        self.fail_process.store(fail, Ordering::SeqCst);
    }

    /// Make `process_blocks` panic instead of returning.
    pub fn set_panic_process(&self, panic: bool) {
        self.panic_process.store(panic, Ordering::SeqCst);
    }

    pub fn process_calls(&self) -> usize {
        self.process_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Wallet for NullWallet {
    fn process_blocks(&self) -> Result<(), CollaboratorError> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_process.load(Ordering::SeqCst) {
            panic!("wallet processing panicked");
        }
        if self.fail_process.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Wallet("corrupt wallet entry".into()));
        }
        Ok(())
    }

    fn close(&self) -> Result<(), CollaboratorError> {
        self.log.record("wallet.close");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
