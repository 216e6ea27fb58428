//! Interceptor admin surface.
//!
//! - `GET /queue`: this replica's pending request count
//! - `GET|POST /routing_ping`: refresh the routing table from the control plane
//! - `GET /routing_table`: the installed routing table
//! - `GET /healthz`: liveness

pub mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::http::PendingRequests;
use crate::lifecycle::Shutdown;
use crate::routing::RoutingSync;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub pending: Arc<PendingRequests>,
    pub sync: Arc<RoutingSync>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/queue", get(get_queue))
        .route("/routing_ping", get(routing_ping).post(routing_ping))
        .route("/routing_table", get(get_routing_table))
        .route("/healthz", get(healthz))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the admin router on `listener` until shutdown.
pub async fn serve(listener: TcpListener, state: AdminState, shutdown: Shutdown) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin server starting");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(shutdown.signalled())
        .await?;
    tracing::info!("Admin server stopped");
    Ok(())
}
