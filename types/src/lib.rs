//! Fundamental types for the gatehouse node front door.
//!
//! This crate defines the vocabulary shared across every other crate in the
//! workspace: network identifiers, timestamps, and the contracts of the
//! external engines (ledger, wallet, peer sessions, notification indexer)
//! that the orchestrator drives but does not implement.

pub mod collaborator;
pub mod error;
pub mod network;
pub mod time;

pub use collaborator::{LedgerBackend, NotificationIndexer, PeerSessionManager, Wallet};
pub use error::CollaboratorError;
pub use network::NetworkId;
pub use time::Timestamp;
