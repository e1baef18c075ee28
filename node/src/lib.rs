//! Node front door: orchestrates the collaborators and the HTTP surface.
//!
//! The node is the central coordinator that:
//! - Attaches the ledger backend and persists it on a fixed cadence
//! - Drives wallet block processing when a wallet is attached
//! - Starts and stops the peer network and the notification indexer
//! - Logs chain height from a detached monitor thread
//! - Serves the JSON-RPC (optionally guarded) and REST listeners

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod monitor;
pub mod node;
pub mod periodic;
pub mod shutdown;

pub use config::NodeConfig;
pub use error::NodeError;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use monitor::HeightMonitor;
pub use node::{Collaborators, Node};
pub use periodic::{PeriodicTask, TaskFailure};
pub use shutdown::ShutdownController;
