//! Request handler contract.
//!
//! JSON-RPC and REST method dispatch live in external handlers; the server
//! only authenticates, calls the handler, and packages its result.

use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use serde::Serialize;
use serde_json::Value;

use crate::auth::Principal;
use crate::error::ApiError;

/// Content type used for structured output and as the raw-payload default.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// An inbound API request, detached from the HTTP framework.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> Result<Value, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))
    }
}

/// What a handler produced.
#[derive(Clone, Debug, PartialEq)]
pub enum HandlerOutput {
    /// A structured value; serialized to compact JSON by the pipeline.
    Json(Value),
    /// An already-serialized payload, passed through unchanged.
    Raw {
        body: Bytes,
        content_type: Option<String>,
    },
}

impl HandlerOutput {
    /// Serialize any `Serialize` value into a structured output.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, ApiError> {
        serde_json::to_value(value)
            .map(HandlerOutput::Json)
            .map_err(|e| ApiError::internal(format!("serialization failed: {e}")))
    }

    pub fn raw(body: impl Into<Bytes>) -> Self {
        HandlerOutput::Raw {
            body: body.into(),
            content_type: None,
        }
    }
}

/// Serves API requests on behalf of a principal.
///
/// Authenticated principals are entitled to the extended method set;
/// anonymous principals only to the public one. The handler decides.
pub trait ApiHandler: Send + Sync {
    fn handle(
        &self,
        request: &ApiRequest,
        principal: &Principal,
    ) -> Result<HandlerOutput, ApiError>;
}

impl<F> ApiHandler for F
where
    F: Fn(&ApiRequest, &Principal) -> Result<HandlerOutput, ApiError> + Send + Sync,
{
    fn handle(
        &self,
        request: &ApiRequest,
        principal: &Principal,
    ) -> Result<HandlerOutput, ApiError> {
        self(request, principal)
    }
}
