//! API error types.

use axum::http::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

/// Why a request could not be associated with a principal.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong username or password. Always preceded by the backoff delay.
    #[error("invalid username or password")]
    Unauthorized,

    /// The `Authorization` header used a scheme other than Basic.
    #[error("unsupported credential type: {0}")]
    UnsupportedCredentialType(String),

    /// A Basic header whose payload is not `base64(username:password)`.
    #[error("malformed credentials: {0}")]
    MalformedCredentials(String),

    /// No credentials on a route that does not allow anonymous access.
    #[error("authentication required")]
    CredentialsRequired,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::KeyDerivation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Error returned by a request handler.
///
/// The body shape is defined by the handler; the pipeline only serializes it.
#[derive(Debug, Error)]
#[error("{status}: {body}")]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    /// A `{"error": message}` body with the given status.
    pub fn message(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(status, json!({ "error": message.into() }))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::message(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::message(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::message(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<&AuthError> for ApiError {
    fn from(e: &AuthError) -> Self {
        ApiError::message(e.status(), e.to_string())
    }
}

/// Failure to run an API listener.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}
