//! Control-plane admin endpoint.
//!
//! - `GET /routing`: the authoritative routing document
//! - `GET /healthz`: liveness

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::lifecycle::Shutdown;
use crate::operator::registry::RouteRegistry;
use crate::routing::RoutingDocument;

pub fn setup_admin_router(registry: Arc<RouteRegistry>) -> Router {
    Router::new()
        .route("/routing", get(get_routing))
        .route("/healthz", get(healthz))
        .with_state(registry)
        .layer(TraceLayer::new_for_http())
}

async fn get_routing(State(registry): State<Arc<RouteRegistry>>) -> Json<RoutingDocument> {
    Json(registry.document())
}

async fn healthz() -> &'static str {
    "OK"
}

/// Serve the admin router on `listener` until shutdown.
pub async fn serve(listener: TcpListener, registry: Arc<RouteRegistry>, shutdown: Shutdown) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Operator admin endpoint listening");
    axum::serve(listener, setup_admin_router(registry))
        .with_graceful_shutdown(shutdown.signalled())
        .await?;
    tracing::info!("Operator admin endpoint stopped");
    Ok(())
}
