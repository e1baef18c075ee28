//! Error type reported by external collaborators.

use thiserror::Error;

/// Failure reported by one of the engines the front door drives.
///
/// The front door never inspects these beyond logging them or aborting
/// start-up, so the variants only distinguish where the failure came from.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("notification index error: {0}")]
    Notifications(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
