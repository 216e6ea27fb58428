use axum::{extract::State, http::StatusCode, Json};

use crate::admin::AdminState;
use crate::routing::RoutingDocument;

/// Pending requests of this replica, as a bare JSON integer.
pub async fn get_queue(State(state): State<AdminState>) -> Json<u64> {
    Json(state.pending.current())
}

/// Pull the routing table from the control plane now.
pub async fn routing_ping(State(state): State<AdminState>) -> (StatusCode, &'static str) {
    match state.sync.sync().await {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "error fetching routing table"),
    }
}

/// Currently installed routing table.
pub async fn get_routing_table(State(state): State<AdminState>) -> Json<RoutingDocument> {
    Json(state.sync.table().snapshot().to_document())
}

pub async fn healthz() -> &'static str {
    "OK"
}
