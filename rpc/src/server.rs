//! Axum-based API listener.
//!
//! One [`ApiServer`] backs one listening socket. Every request is routed to
//! a single fallback that resolves the caller's principal according to the
//! listener's [`AccessPolicy`], hands the request to the configured
//! [`ApiHandler`], and renders the result through the [`ResponsePipeline`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, WWW_AUTHENTICATE,
};
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, info, warn};

use crate::auth::{Credentials, Principal, SharedGuard};
use crate::error::{ApiError, AuthError, RpcError};
use crate::handlers::{ApiHandler, ApiRequest, HandlerOutput};
use crate::response::{ResponsePipeline, CORS_ALLOW_HEADERS, CORS_ALLOW_ORIGIN};

/// Largest request body accepted.
pub const MAX_REQUEST_BODY: usize = 10 * 1024 * 1024;

/// Which API a listener serves. Only used for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerKind {
    Rpc,
    Rest,
}

impl ListenerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerKind::Rpc => "rpc",
            ListenerKind::Rest => "rest",
        }
    }
}

impl std::fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a listener decides who a request runs as.
#[derive(Clone, Debug)]
pub enum AccessPolicy {
    /// No authentication; every request is anonymous.
    Open,
    /// Requests carrying credentials are checked by the guard. Requests
    /// without credentials are anonymous when `allow_anonymous` is set,
    /// rejected otherwise.
    Guarded {
        guard: SharedGuard,
        allow_anonymous: bool,
    },
}

struct ServerState {
    kind: ListenerKind,
    policy: AccessPolicy,
    handler: Arc<dyn ApiHandler>,
    pipeline: ResponsePipeline,
}

/// An API listener, not yet bound.
pub struct ApiServer {
    state: Arc<ServerState>,
}

impl ApiServer {
    pub fn new(kind: ListenerKind, handler: Arc<dyn ApiHandler>, policy: AccessPolicy) -> Self {
        Self::with_pipeline(kind, handler, policy, ResponsePipeline::default())
    }

    pub fn with_pipeline(
        kind: ListenerKind,
        handler: Arc<dyn ApiHandler>,
        policy: AccessPolicy,
        pipeline: ResponsePipeline,
    ) -> Self {
        Self {
            state: Arc::new(ServerState {
                kind,
                policy,
                handler,
                pipeline,
            }),
        }
    }

    pub fn kind(&self) -> ListenerKind {
        self.state.kind
    }

    /// The router serving this listener. Any method, any path.
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(Arc::clone(&self.state))
            .layer(SetResponseHeaderLayer::if_not_present(
                ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static(CORS_ALLOW_ORIGIN),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static(CORS_ALLOW_HEADERS),
            ))
    }

    /// Bind the listening socket. Port 0 picks an ephemeral port.
    pub async fn bind(self, addr: SocketAddr) -> Result<BoundServer, RpcError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| RpcError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        info!(listener = %self.state.kind, addr = %local_addr, "API listener bound");
        Ok(BoundServer {
            kind: self.state.kind,
            router: self.router(),
            listener,
            local_addr,
        })
    }
}

/// A bound listener, ready to serve.
pub struct BoundServer {
    kind: ListenerKind,
    router: Router,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl std::fmt::Debug for BoundServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundServer")
            .field("kind", &self.kind)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Serve until `shutdown` resolves, then finish in-flight requests.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), RpcError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!(listener = %self.kind, addr = %self.local_addr, "API listener stopped");
        Ok(())
    }
}

async fn dispatch(State(state): State<Arc<ServerState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let headers = parts.headers;

    let principal = match resolve_principal(&state.policy, &headers).await {
        Ok(principal) => principal,
        Err(e) => return auth_failure(&state, &e, &headers),
    };

    let body = match axum::body::to_bytes(body, MAX_REQUEST_BODY).await {
        Ok(body) => body,
        Err(e) => {
            let err = ApiError::message(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("failed to read request body: {e}"),
            );
            return state.pipeline.render(Err(err), &headers);
        }
    };

    let api_request = ApiRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: headers.clone(),
        body,
    };
    debug!(
        listener = %state.kind,
        method = %api_request.method,
        path = %api_request.path,
        principal = principal.name(),
        "dispatching request"
    );

    let handler = Arc::clone(&state.handler);
    let result = tokio::task::spawn_blocking(move || handler.handle(&api_request, &principal))
        .await
        .unwrap_or_else(|e| {
            warn!(listener = %state.kind, error = %e, "request handler panicked");
            Err(ApiError::internal("internal error"))
        });

    state.pipeline.render(result, &headers)
}

/// Resolve who a request runs as.
pub async fn resolve_principal(
    policy: &AccessPolicy,
    headers: &axum::http::HeaderMap,
) -> Result<Principal, AuthError> {
    let (guard, allow_anonymous) = match policy {
        AccessPolicy::Open => return Ok(Principal::Anonymous),
        AccessPolicy::Guarded {
            guard,
            allow_anonymous,
        } => (guard, *allow_anonymous),
    };

    let Some(value) = headers.get(AUTHORIZATION) else {
        return if allow_anonymous {
            Ok(Principal::Anonymous)
        } else {
            Err(AuthError::CredentialsRequired)
        };
    };

    let value = value
        .to_str()
        .map_err(|e| AuthError::MalformedCredentials(e.to_string()))?;
    let credentials = Credentials::from_authorization(value)?;
    guard.authenticate_credentials(&credentials).await
}

fn auth_failure(
    state: &ServerState,
    error: &AuthError,
    headers: &axum::http::HeaderMap,
) -> Response {
    let mut response = state.pipeline.render_with_status(
        error.status(),
        HandlerOutput::Json(ApiError::from(error).body),
        headers,
    );
    if error.status() == StatusCode::UNAUTHORIZED {
        if let AccessPolicy::Guarded { guard, .. } = &state.policy {
            if let Ok(challenge) = HeaderValue::from_str(&guard.challenge()) {
                response.headers_mut().insert(WWW_AUTHENTICATE, challenge);
            }
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::test_config;
    use crate::auth::CredentialGuard;
    use axum::body::Body;
    use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING};
    use axum::http::Method;
    use base64::Engine;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn echo_handler() -> Arc<dyn ApiHandler> {
        Arc::new(
            |req: &ApiRequest, principal: &Principal| -> Result<HandlerOutput, ApiError> {
                if req.path == "/missing" {
                    return Err(ApiError::not_found("no such method"));
                }
                if req.path == "/large" {
                    return Ok(HandlerOutput::raw(vec![b'x'; 4096]));
                }
                Ok(HandlerOutput::Json(json!({
                    "path": req.path,
                    "extended": principal.is_authenticated(),
                })))
            },
        )
    }

    fn guarded(allow_anonymous: bool) -> AccessPolicy {
        let guard = CredentialGuard::new("admin", "hunter2", test_config(0)).unwrap();
        AccessPolicy::Guarded {
            guard: Arc::new(guard),
            allow_anonymous,
        }
    }

    fn basic(user: &str, pass: &str) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        format!("Basic {encoded}")
    }

    async fn send(router: Router, request: axum::http::Request<Body>) -> (Response, Value) {
        let response = router.oneshot(request).await.unwrap();
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (Response::from_parts(parts, Body::empty()), value)
    }

    fn get(path: &str) -> axum::http::request::Builder {
        axum::http::Request::builder().method(Method::GET).uri(path)
    }

    #[tokio::test]
    async fn open_listener_serves_anonymously_with_cors() {
        let server = ApiServer::new(ListenerKind::Rest, echo_handler(), AccessPolicy::Open);
        let request = get("/v1/height").body(Body::empty()).unwrap();
        let (response, body) = send(server.router(), request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body, json!({ "path": "/v1/height", "extended": false }));
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            response.headers()[ACCESS_CONTROL_ALLOW_HEADERS],
            CORS_ALLOW_HEADERS
        );
    }

    #[tokio::test]
    async fn handler_errors_keep_status_and_cors() {
        let server = ApiServer::new(ListenerKind::Rpc, echo_handler(), AccessPolicy::Open);
        let request = get("/missing").body(Body::empty()).unwrap();
        let (response, body) = send(server.router(), request).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "no such method");
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn valid_credentials_get_the_extended_api() {
        let server = ApiServer::new(ListenerKind::Rpc, echo_handler(), guarded(true));
        let request = get("/")
            .header(AUTHORIZATION, basic("admin", "hunter2"))
            .body(Body::empty())
            .unwrap();
        let (response, body) = send(server.router(), request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body["extended"], true);
    }

    #[tokio::test]
    async fn missing_credentials_fall_back_to_anonymous_when_allowed() {
        let server = ApiServer::new(ListenerKind::Rpc, echo_handler(), guarded(true));
        let (response, body) = send(server.router(), get("/").body(Body::empty()).unwrap()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body["extended"], false);
    }

    #[tokio::test]
    async fn missing_credentials_rejected_when_anonymous_disallowed() {
        let server = ApiServer::new(ListenerKind::Rpc, echo_handler(), guarded(false));
        let (response, _) = send(server.router(), get("/").body(Body::empty()).unwrap()).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Basic realm=\"auth\"");
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized_with_challenge() {
        let policy = guarded(true);
        let AccessPolicy::Guarded { guard, .. } = &policy else {
            unreachable!()
        };
        let guard = Arc::clone(guard);
        let server = ApiServer::new(ListenerKind::Rpc, echo_handler(), policy);
        let request = get("/")
            .header(AUTHORIZATION, basic("admin", "wrong"))
            .body(Body::empty())
            .unwrap();
        let (response, body) = send(server.router(), request).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Basic realm=\"auth\"");
        assert_eq!(body["error"], "invalid username or password");
        assert_eq!(guard.failures("admin"), Some(1));
    }

    #[tokio::test]
    async fn unsupported_scheme_is_rejected_without_recording_failure() {
        let policy = guarded(true);
        let AccessPolicy::Guarded { guard, .. } = &policy else {
            unreachable!()
        };
        let guard = Arc::clone(guard);
        let server = ApiServer::new(ListenerKind::Rpc, echo_handler(), policy);
        let request = get("/")
            .header(AUTHORIZATION, "Bearer abc.def")
            .body(Body::empty())
            .unwrap();
        let (response, body) = send(server.router(), request).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("unsupported credential type"));
        assert!(guard.failures("admin").is_none());
    }

    #[tokio::test]
    async fn large_responses_are_gzipped_for_capable_clients() {
        let server = ApiServer::new(ListenerKind::Rest, echo_handler(), AccessPolicy::Open);
        let request = get("/large")
            .header(ACCEPT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap();
        let response = server.router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_ENCODING], "gzip");
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn bound_server_serves_until_shutdown() {
        let server = ApiServer::new(ListenerKind::Rest, echo_handler(), AccessPolicy::Open);
        let bound = server.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = bound.local_addr();
        assert_ne!(addr.port(), 0);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(bound.serve(async move {
            let _ = rx.await;
        }));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET /ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        assert!(raw.starts_with("HTTP/1.1 200"));
        assert!(raw.to_ascii_lowercase().contains("access-control-allow-origin: *"));

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let first = ApiServer::new(ListenerKind::Rpc, echo_handler(), AccessPolicy::Open)
            .bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let err = ApiServer::new(ListenerKind::Rest, echo_handler(), AccessPolicy::Open)
            .bind(first.local_addr())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Bind { .. }));
    }

    #[tokio::test]
    async fn bound_server_debug_names_kind_and_address() {
        let bound = ApiServer::new(ListenerKind::Rest, echo_handler(), AccessPolicy::Open)
            .bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let rendered = format!("{bound:?}");
        assert!(rendered.contains("Rest"));
        assert!(rendered.contains(&bound.local_addr().to_string()));
    }
}
