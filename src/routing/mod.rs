//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Control plane GET /routing (JSON document)
//!     → sync.rs (fetch, decode)
//!     → table.rs (validate, compile RouteMap, atomic swap)
//!
//! Forwarded request (own application name, path)
//!     → matcher.rs (RouteKey)
//!     → table.rs lookup on the current snapshot
//!     → Backend or no match (caller falls back to its bound backend)
//! ```
//!
//! # Design Decisions
//! - Compiled maps are immutable; only the pointer to the current one changes
//! - A failed sync never touches the installed map
//! - Deterministic: same key against the same map always yields the same backend

pub mod matcher;
pub mod sync;
pub mod table;

pub use matcher::RouteKey;
pub use sync::{RoutingSync, SyncError};
pub use table::{Backend, RouteEntry, RouteMap, RoutingDocument, RoutingTable, TableError};
