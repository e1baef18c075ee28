//! Nullable peer session manager and notification indexer.

use std::sync::atomic::{AtomicBool, Ordering};

use gatehouse_types::{CollaboratorError, NotificationIndexer, PeerSessionManager};

use crate::log::CallLog;

/// Peer sessions that never open a socket.
#[derive(Debug, Default)]
pub struct NullPeerSessions {
    running: AtomicBool,
    fail_start: AtomicBool,
    log: CallLog,
}

impl NullPeerSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl PeerSessionManager for NullPeerSessions {
    fn start(&self) -> Result<(), CollaboratorError> {
        self.log.record("peers.start");
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Network("address in use".into()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) -> Result<(), CollaboratorError> {
        self.log.record("peers.shutdown");
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A notification indexer with no backing database.
#[derive(Debug, Default)]
pub struct NullIndexer {
    running: AtomicBool,
    fail_start: AtomicBool,
    log: CallLog,
}

impl NullIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl NotificationIndexer for NullIndexer {
    fn start(&self) -> Result<(), CollaboratorError> {
        self.log.record("indexer.start");
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Notifications("index is corrupt".into()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), CollaboratorError> {
        self.log.record("indexer.close");
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}
