//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → servers stop accepting, periodic tasks exit their loops
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
