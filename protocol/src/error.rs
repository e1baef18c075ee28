use thiserror::Error;

/// Failure to decode bytes received from a peer.
///
/// Decode errors are surfaced to the session layer as-is and never retried;
/// the usual response is to drop the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),
}
