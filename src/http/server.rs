//! Interceptor proxy server.
//!
//! # Responsibilities
//! - Create the Axum router that sends every path to the forwarder
//! - Wire up middleware (request id, tracing, request timeout)
//! - Serve on a bound listener until shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::InterceptorConfig;
use crate::http::forwarder::Forwarder;
use crate::http::request::UuidRequestId;
use crate::lifecycle::Shutdown;

/// HTTP server for the interceptor's proxy port.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &InterceptorConfig, forwarder: Arc<Forwarder>) -> Self {
        let router = Self::build_router(Duration::from_secs(config.request_timeout_secs), forwarder);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(request_timeout: Duration, forwarder: Arc<Forwarder>) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(forwarder)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Proxy server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown.signalled())
            .await?;

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

async fn proxy_handler(State(forwarder): State<Arc<Forwarder>>, request: Request<Body>) -> Response {
    forwarder.forward(request).await
}
