//! Queue depth subsystem of the scaler.
//!
//! # Data Flow
//! ```text
//! discovery.rs (ready replicas of the interceptor Service)
//!     → aggregator.rs (concurrent GET /queue, bounded, timed out)
//!     → snapshot.rs (publish (sum, now))
//!     → scaler service reads
//! ```

pub mod aggregator;
pub mod discovery;
pub mod snapshot;

pub use aggregator::{AggregatorSettings, CycleReport, QueryError, QueueAggregator};
pub use discovery::{BackendEndpoint, DiscoveryError, EndpointDiscovery, KubeEndpointDiscovery, StaticDiscovery};
pub use snapshot::{QueueSnapshot, SnapshotStore};
