//! Response pipeline: serialize, conditionally compress, attach CORS.
//!
//! Every response leaving an API listener, success or error, goes through
//! [`ResponsePipeline::render`]. Compression only ever changes the size and
//! headers of a response, never its meaning: if it fails, the uncompressed
//! body is sent.

use std::io::Write;

use axum::body::{Body, Bytes};
use axum::http::header::{
    ACCEPT_ENCODING, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_ENCODING,
    CONTENT_LENGTH, CONTENT_TYPE, VARY,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;

use crate::error::ApiError;
use crate::handlers::{HandlerOutput, JSON_CONTENT_TYPE};

/// Payload size of a standard Ethernet TCP packet.
pub const MTU_TCP_PACKET_SIZE: usize = 1500;
/// Protocol overhead allowance on top of the MTU.
pub const BASE_STRING_SIZE: usize = 49;
/// Bodies longer than this are eligible for compression.
pub const COMPRESS_THRESHOLD: usize = MTU_TCP_PACKET_SIZE + BASE_STRING_SIZE;

/// `Access-Control-Allow-Origin` value.
pub const CORS_ALLOW_ORIGIN: &str = "*";
/// `Access-Control-Allow-Headers` value.
pub const CORS_ALLOW_HEADERS: &str =
    "Content-Type, Access-Control-Allow-Headers, Authorization, X-Requested-With";

/// Insert the permissive CORS headers into `headers`.
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(CORS_ALLOW_ORIGIN),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
}

/// Whether the request's `Accept-Encoding` headers accept gzip.
///
/// A `gzip` token with `q=0` is an explicit refusal.
pub fn accepts_gzip(request_headers: &HeaderMap) -> bool {
    request_headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| {
            let mut parts = token.split(';').map(str::trim);
            let coding = parts.next().unwrap_or_default();
            if !coding.eq_ignore_ascii_case("gzip") {
                return false;
            }
            !parts.any(|param| {
                param
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            })
        })
}

/// gzip `payload` at the fastest compression level.
pub fn gzip_fastest(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 2), Compression::fast());
    encoder.write_all(payload)?;
    encoder.finish()
}

/// Final bytes and headers of a response, before status is attached.
#[derive(Debug, Clone)]
pub struct PreparedResponse {
    pub body: Bytes,
    pub headers: HeaderMap,
    pub compressed: bool,
}

/// Packages handler results into HTTP responses.
#[derive(Debug, Clone, Copy)]
pub struct ResponsePipeline {
    threshold: usize,
}

impl Default for ResponsePipeline {
    fn default() -> Self {
        Self::new(COMPRESS_THRESHOLD)
    }
}

impl ResponsePipeline {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Serialize, maybe compress, and attach CORS headers.
    pub fn prepare(&self, output: HandlerOutput, request_headers: &HeaderMap) -> PreparedResponse {
        let (payload, content_type) = match output {
            HandlerOutput::Json(value) => (serialize_json(&value), None),
            HandlerOutput::Raw { body, content_type } => (body, content_type),
        };

        let mut headers = HeaderMap::new();
        let content_type = content_type
            .and_then(|ct| HeaderValue::from_str(&ct).ok())
            .unwrap_or_else(|| HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(CONTENT_TYPE, content_type);

        let mut body = payload;
        let mut compressed = false;
        if body.len() > self.threshold && accepts_gzip(request_headers) {
            match gzip_fastest(&body) {
                Ok(gz) => {
                    tracing::trace!(
                        original = body.len(),
                        compressed = gz.len(),
                        "compressed response body"
                    );
                    body = Bytes::from(gz);
                    compressed = true;
                    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                    headers.insert(VARY, HeaderValue::from_static("accept-encoding"));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "response compression failed, sending uncompressed");
                }
            }
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        apply_cors(&mut headers);

        PreparedResponse {
            body,
            headers,
            compressed,
        }
    }

    /// Render a handler result (or handler error) into a full response.
    pub fn render(
        &self,
        result: Result<HandlerOutput, ApiError>,
        request_headers: &HeaderMap,
    ) -> Response {
        let (status, output) = match result {
            Ok(output) => (StatusCode::OK, output),
            Err(ApiError { status, body }) => (status, HandlerOutput::Json(body)),
        };
        self.render_with_status(status, output, request_headers)
    }

    pub fn render_with_status(
        &self,
        status: StatusCode,
        output: HandlerOutput,
        request_headers: &HeaderMap,
    ) -> Response {
        let prepared = self.prepare(output, request_headers);
        let mut response = (status, Body::from(prepared.body)).into_response();
        response.headers_mut().extend(prepared.headers);
        response
    }
}

/// Compact JSON text. A `Value` always serializes.
fn serialize_json(value: &Value) -> Bytes {
    Bytes::from(value.to_string())
}
