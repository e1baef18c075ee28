//! Contracts of the engines driven by the node orchestrator.
//!
//! Every method is synchronous; the orchestrator moves calls that may block
//! (persistence, wallet processing) onto blocking threads itself. All
//! implementations must be shareable across threads.

use crate::CollaboratorError;

/// Ledger storage backend (block persistence and chain height).
pub trait LedgerBackend: Send + Sync {
    /// Acquire the underlying storage (open databases, take locks).
    fn open(&self) -> Result<(), CollaboratorError>;

    /// Persist any blocks received since the last call.
    fn persist(&self) -> Result<(), CollaboratorError>;

    /// Current chain height.
    fn height(&self) -> u32;

    /// Flush and release all storage handles.
    fn dispose(&self) -> Result<(), CollaboratorError>;
}

/// An open wallet that tracks the chain.
pub trait Wallet: Send + Sync {
    /// Process newly persisted blocks relevant to the wallet.
    fn process_blocks(&self) -> Result<(), CollaboratorError>;

    /// Release the wallet file.
    fn close(&self) -> Result<(), CollaboratorError>;
}

/// The peer-to-peer listener and session manager.
pub trait PeerSessionManager: Send + Sync {
    fn start(&self) -> Result<(), CollaboratorError>;

    fn shutdown(&self) -> Result<(), CollaboratorError>;
}

/// Smart-contract notification indexer.
pub trait NotificationIndexer: Send + Sync {
    fn start(&self) -> Result<(), CollaboratorError>;

    fn close(&self) -> Result<(), CollaboratorError>;
}
