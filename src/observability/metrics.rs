//! Metrics collection and exposition.
//!
//! # Metrics
//! - `interceptor_requests_total` (counter): proxied requests by status
//! - `interceptor_request_duration_seconds` (histogram): proxy latency
//! - `interceptor_pending_requests` (gauge): in-flight proxied requests
//! - `interceptor_routing_syncs_total` (counter): routing refreshes by result
//! - `scaler_queue_depth` (gauge): last published aggregate
//! - `scaler_endpoint_failures_total` (counter): dropped replica queries
//! - `operator_reconciliations_total` (counter): passes by result
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(status: u16, start: Instant) {
    counter!("interceptor_requests_total", "status" => status.to_string()).increment(1);
    histogram!("interceptor_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn set_pending_requests(pending: u64) {
    gauge!("interceptor_pending_requests").set(pending as f64);
}

pub fn record_routing_sync(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("interceptor_routing_syncs_total", "result" => result).increment(1);
}

pub fn set_queue_depth(depth: u64) {
    gauge!("scaler_queue_depth").set(depth as f64);
}

pub fn record_endpoint_failure() {
    counter!("scaler_endpoint_failures_total").increment(1);
}

pub fn record_reconcile(result: &'static str) {
    counter!("operator_reconciliations_total", "result" => result).increment(1);
}
