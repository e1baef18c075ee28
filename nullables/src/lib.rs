//! Nullable collaborators for deterministic testing.
//!
//! The node drives engines it does not implement (ledger, wallet, peer
//! sessions, notification indexer, API handlers). This crate provides
//! in-memory implementations that:
//! - Never touch the filesystem or network
//! - Can be scripted to fail at a chosen step
//! - Record lifecycle calls into a shared [`CallLog`] for ordering assertions

pub mod api;
pub mod ledger;
pub mod log;
pub mod peers;
pub mod wallet;

pub use api::NullApiHandler;
pub use ledger::NullLedger;
pub use log::CallLog;
pub use peers::{NullIndexer, NullPeerSessions};
pub use wallet::NullWallet;
