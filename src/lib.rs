//! HTTP-request-driven autoscaling for Kubernetes applications.
//!
//! Three cooperating processes share this library:
//! - `interceptor`: per-application reverse proxy that counts requests in flight
//! - `scaler`: sums the interceptors' counts and serves them to KEDA over gRPC
//! - `operator`: converges `HTTPScaledObject`s into their managed resources

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod operator;
pub mod queue;
pub mod routing;
pub mod scaler;

pub use config::AutoscalerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
