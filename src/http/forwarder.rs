//! Reverse-proxy forwarding for one application.
//!
//! # Responsibilities
//! - Pick the target: the bound application's own route for the path, else
//!   the bound backend
//! - Rewrite the URI and `Host` to the target, keep method, path and query
//! - Stream the upstream response back unmodified
//! - Count requests in flight for the `/queue` admin endpoint
//!
//! # Design Decisions
//! - One forwarder serves one application: the request's `Host` never
//!   selects a backend, so routes of other applications are unreachable
//! - No retries: an upstream error becomes a 502 for the caller
//! - The in-flight count is held by an RAII guard, so cancelled requests
//!   (client gone, timeout layer fired) are still decremented

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::uri::{Authority, Scheme};
use axum::http::{header, HeaderValue, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::http::request::request_id_of;
use crate::observability::metrics;
use crate::routing::matcher::normalize_host;
use crate::routing::{Backend, RouteKey, RoutingTable};

/// Requests currently being forwarded by this replica.
#[derive(Debug, Default)]
pub struct PendingRequests {
    count: AtomicU64,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Count one request until the returned guard is dropped.
    pub fn track(self: &Arc<Self>) -> PendingGuard {
        let now = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::set_pending_requests(now);
        PendingGuard {
            pending: self.clone(),
        }
    }
}

pub struct PendingGuard {
    pending: Arc<PendingRequests>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let now = self.pending.count.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        metrics::set_pending_requests(now);
    }
}

/// Forwards every request to its target backend.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    app: String,
    bound: Backend,
    table: Arc<RoutingTable>,
    pending: Arc<PendingRequests>,
}

impl Forwarder {
    /// `app` is the routing-table host of the application this forwarder serves.
    pub fn new(app: impl AsRef<str>, bound: Backend, table: Arc<RoutingTable>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            app: normalize_host(app.as_ref()),
            bound,
            table,
            pending: Arc::new(PendingRequests::new()),
        }
    }

    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    /// This application's route for the request path, or the bound backend.
    pub fn target_for<B>(&self, request: &Request<B>) -> Backend {
        self.table
            .lookup(&RouteKey::new(&self.app, request.uri().path()))
            .unwrap_or_else(|| self.bound.clone())
    }

    pub async fn forward(&self, request: Request<Body>) -> Response {
        let _guard = self.pending.track();
        let start = Instant::now();
        let request_id = request_id_of(&request).to_string();
        let target = self.target_for(&request);

        tracing::debug!(
            request_id = %request_id,
            method = %request.method(),
            path = %request.uri().path(),
            backend = %target,
            "Forwarding request"
        );

        let (mut parts, body) = request.into_parts();
        let rewritten = rewrite_uri(&parts.uri, &target)
            .zip(HeaderValue::from_str(&target.authority()).ok());
        match rewritten {
            Some((uri, host)) => {
                parts.uri = uri;
                parts.headers.insert(header::HOST, host);
            }
            None => {
                tracing::error!(request_id = %request_id, backend = %target, "Backend is not a valid URI authority");
                metrics::record_request(502, start);
                return (StatusCode::BAD_GATEWAY, "Invalid backend address").into_response();
            }
        }

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => {
                metrics::record_request(response.status().as_u16(), start);
                let (parts, body) = response.into_parts();
                Response::from_parts(parts, Body::new(body))
            }
            Err(e) => {
                tracing::error!(request_id = %request_id, backend = %target, error = %e, "Upstream error");
                metrics::record_request(502, start);
                (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
            }
        }
    }
}

/// Same path and query, `http://<backend>` as scheme and authority.
pub fn rewrite_uri(uri: &Uri, backend: &Backend) -> Option<Uri> {
    let mut parts = uri.clone().into_parts();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Some(Authority::from_str(&backend.authority()).ok()?);
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some("/".parse().ok()?);
    }
    Uri::from_parts(parts).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{RouteEntry, RouteMap, RoutingDocument};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Backend answering with its own name, the request line and the `Host` it saw.
    async fn echo_backend(name: &'static str) -> Backend {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let head = String::from_utf8_lossy(&buf[..n]).to_string();
                    let line = head.lines().next().unwrap_or_default().to_string();
                    let host = head
                        .lines()
                        .find_map(|l| l.strip_prefix("host: ").or_else(|| l.strip_prefix("Host: ")))
                        .unwrap_or_default()
                        .to_string();
                    let body = format!("{} {}", name, line);
                    let response = format!(
                        "HTTP/1.1 201 Created\r\nX-Backend: {}\r\nX-Seen-Host: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        name,
                        host,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        Backend::new("127.0.0.1", addr.port())
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn request(host: &str, path: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(path)
            .header("host", host)
            .body(Body::empty())
            .unwrap()
    }

    fn table_with(routes: Vec<(&str, Option<&str>, Backend)>) -> Arc<RoutingTable> {
        let table = Arc::new(RoutingTable::new());
        table.replace(
            RouteMap::from_document(RoutingDocument {
                version: 1,
                routes: routes
                    .into_iter()
                    .map(|(host, prefix, backend)| RouteEntry {
                        host: host.into(),
                        path_prefix: prefix.map(str::to_string),
                        backend,
                    })
                    .collect(),
            })
            .unwrap(),
        );
        table
    }

    #[test]
    fn test_rewrite_uri_keeps_path_and_query() {
        let uri: Uri = "/a/b?x=1&y=2".parse().unwrap();
        let rewritten = rewrite_uri(&uri, &Backend::new("demo.ns", 8080)).unwrap();
        assert_eq!(rewritten.to_string(), "http://demo.ns:8080/a/b?x=1&y=2");
    }

    #[tokio::test]
    async fn test_forwards_to_bound_backend() {
        let bound = echo_backend("bound").await;
        let authority = bound.authority();
        let forwarder = Forwarder::new("demo", bound, Arc::new(RoutingTable::new()));

        let response = forwarder.forward(request("client-facing.example", "/items/7?full=true")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-backend"], "bound");
        assert_eq!(response.headers()["x-seen-host"], authority.as_str());
        assert_eq!(body_text(response).await, "bound DELETE /items/7?full=true HTTP/1.1");
        assert_eq!(forwarder.pending().current(), 0);
    }

    #[tokio::test]
    async fn test_own_route_overrides_bound_backend() {
        let bound = echo_backend("bound").await;
        let routed = echo_backend("routed").await;
        let authority = routed.authority();
        let table = table_with(vec![("demo", Some("/api"), routed)]);
        let forwarder = Forwarder::new("demo", bound, table);

        let hit = forwarder.forward(request("anything", "/api/x")).await;
        assert_eq!(hit.headers()["x-backend"], "routed");
        assert_eq!(hit.headers()["x-seen-host"], authority.as_str());

        let miss = forwarder.forward(request("anything", "/other")).await;
        assert_eq!(miss.headers()["x-backend"], "bound");
    }

    #[tokio::test]
    async fn test_foreign_host_stays_on_own_application() {
        let mine = echo_backend("mine").await;
        let other = echo_backend("other").await;
        let table = table_with(vec![("otherapp", None, other)]);
        let forwarder = Forwarder::new("demo", mine, table);

        let response = forwarder.forward(request("otherapp", "/")).await;
        assert_eq!(response.headers()["x-backend"], "mine");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_bad_gateway() {
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let forwarder = Forwarder::new(
            "demo",
            Backend::new("127.0.0.1", addr.port()),
            Arc::new(RoutingTable::new()),
        );

        let response = forwarder.forward(request("demo", "/")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(forwarder.pending().current(), 0);
    }

    #[test]
    fn test_pending_guard_counts() {
        let pending = Arc::new(PendingRequests::new());
        let a = pending.track();
        let b = pending.track();
        assert_eq!(pending.current(), 2);
        drop(a);
        assert_eq!(pending.current(), 1);
        drop(b);
        assert_eq!(pending.current(), 0);
    }
}
