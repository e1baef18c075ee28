//! Nullable API handler.

use std::sync::atomic::{AtomicUsize, Ordering};

use gatehouse_rpc::{ApiError, ApiHandler, ApiRequest, HandlerOutput, Principal};
use serde_json::json;

/// Answers every request with the path and whether the caller got the
/// extended API.
#[derive(Debug, Default)]
pub struct NullApiHandler {
    calls: AtomicUsize,
}

impl NullApiHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ApiHandler for NullApiHandler {
    fn handle(
        &self,
        request: &ApiRequest,
        principal: &Principal,
    ) -> Result<HandlerOutput, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HandlerOutput::Json(json!({
            "path": request.path,
            "extended": principal.is_authenticated(),
        })))
    }
}
