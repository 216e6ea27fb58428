//! Configuration validation.
//!
//! Serde handles syntax; this module checks ranges and addresses. It returns
//! every problem found, not just the first, so one edit fixes a broken file.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::AutoscalerConfig;

/// A single semantic problem in a configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `scaler.poll_interval_ms`.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &AutoscalerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "interceptor.proxy_bind_address", &config.interceptor.proxy_bind_address);
    check_addr(&mut errors, "interceptor.admin_bind_address", &config.interceptor.admin_bind_address);
    check_addr(&mut errors, "scaler.grpc_bind_address", &config.scaler.grpc_bind_address);
    check_addr(&mut errors, "operator.admin_bind_address", &config.operator.admin_bind_address);
    if config.observability.metrics_enabled {
        check_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    let interceptor = &config.interceptor;
    check_name(&mut errors, "interceptor.target.service_name", &interceptor.target.service_name);
    check_port(&mut errors, "interceptor.target.port", interceptor.target.port);
    check_name(&mut errors, "interceptor.routing_source.service_name", &interceptor.routing_source.service_name);
    check_port(&mut errors, "interceptor.routing_source.port", interceptor.routing_source.port);
    check_positive(&mut errors, "interceptor.request_timeout_secs", interceptor.request_timeout_secs);
    check_positive(&mut errors, "interceptor.routing_fetch_timeout_secs", interceptor.routing_fetch_timeout_secs);

    let scaler = &config.scaler;
    if scaler.static_endpoints.is_empty() {
        check_name(&mut errors, "scaler.target_namespace", &scaler.target_namespace);
        check_name(&mut errors, "scaler.target_service", &scaler.target_service);
    }
    check_port(&mut errors, "scaler.target_admin_port", scaler.target_admin_port);
    check_positive(&mut errors, "scaler.poll_interval_ms", scaler.poll_interval_ms);
    check_positive(&mut errors, "scaler.query_timeout_ms", scaler.query_timeout_ms);
    if scaler.max_concurrent_queries == 0 {
        errors.push(ValidationError::new("scaler.max_concurrent_queries", "must be at least 1"));
    }
    check_name(&mut errors, "scaler.metric_name", &scaler.metric_name);
    if scaler.target_pending_requests <= 0 {
        errors.push(ValidationError::new("scaler.target_pending_requests", "must be positive"));
    }

    let operator = &config.operator;
    check_name(&mut errors, "operator.cluster_domain", &operator.cluster_domain);
    check_name(&mut errors, "operator.admin_service_name", &operator.admin_service_name);
    check_name(&mut errors, "operator.admin_service_namespace", &operator.admin_service_namespace);
    check_port(&mut errors, "operator.admin_service_port", operator.admin_service_port);
    check_name(&mut errors, "operator.field_manager", &operator.field_manager);
    check_port(&mut errors, "operator.exposed_port", operator.exposed_port);
    check_port(&mut errors, "operator.interceptor_admin_port", operator.interceptor_admin_port);
    check_positive(&mut errors, "operator.error_requeue_ms", operator.error_requeue_ms);
    check_positive(&mut errors, "operator.drift_requeue_secs", operator.drift_requeue_secs);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("'{}' is not a socket address", value)));
    }
}

fn check_name(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError::new(field, "must not be empty"));
    }
}

fn check_port(errors: &mut Vec<ValidationError>, field: &'static str, value: u16) {
    if value == 0 {
        errors.push(ValidationError::new(field, "port must be non-zero"));
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::new(field, "must be greater than zero"));
    }
}
