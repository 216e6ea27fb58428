//! HTTP proxying subsystem of the interceptor.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, trace, timeout)
//!     → forwarder.rs (own route for the path or bound backend, count in flight)
//!     → backend response streamed back
//! ```

pub mod forwarder;
pub mod request;
pub mod server;

pub use forwarder::{Forwarder, PendingRequests};
pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::HttpServer;
