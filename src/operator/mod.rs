//! Operator subsystem.
//!
//! # Data Flow
//! ```text
//! HTTPScaledObject / owned Deployment / owned Service events
//!     → controller.rs (single-flight per key, requeue policy)
//!     → reconciler.rs (state machine, per-resource status)
//!         → resources.rs (derive names, build objects)
//!         → client.rs (apply / delete / status / finalizers)
//!     → registry.rs (authoritative routes)
//!     → admin.rs (GET /routing for interceptors)
//! ```

pub mod admin;
pub mod client;
pub mod controller;
pub mod crd;
pub mod reconciler;
pub mod registry;
pub mod resources;

pub use client::{is_not_found, ClusterClient, KubeClusterClient};
pub use crd::{HTTPScaledObject, HTTPScaledObjectSpec, HTTPScaledObjectStatus, ResourceStatus};
pub use reconciler::{AppKey, ReconcileError, ReconcileOutcome, Reconciler};
pub use registry::RouteRegistry;
pub use resources::{
    KubeResourceFactory, ManagedResource, ManagedResourceSet, ResourceDescriptor, ResourceFactory, ResourceParams,
    Topology,
};
