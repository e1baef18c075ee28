//! HTTP API surface of the node.
//!
//! Provides:
//! - A credential guard for the extended JSON-RPC API (Basic auth with an
//!   Argon2id-derived key and per-principal exponential backoff)
//! - The response pipeline shared by every listener (compact JSON, gzip
//!   above the MTU threshold, permissive CORS)
//! - [`ApiServer`], an axum listener that dispatches every request to an
//!   external [`ApiHandler`]

pub mod auth;
pub mod error;
pub mod failure_history;
pub mod handlers;
pub mod response;
pub mod server;

pub use auth::{
    BackoffPolicy, CredentialGuard, Credentials, DerivedKey, GuardConfig, KdfParams, Principal,
    SharedGuard,
};
pub use error::{ApiError, AuthError, RpcError};
pub use failure_history::BoundedFailureHistory;
pub use handlers::{ApiHandler, ApiRequest, HandlerOutput};
pub use response::{ResponsePipeline, COMPRESS_THRESHOLD};
pub use server::{AccessPolicy, ApiServer, BoundServer, ListenerKind};
