//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → binary applies env/flag overrides, validates again
//!     → AutoscalerConfig (immutable, shared by value/Arc)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults so the operator can start containers with
//!   environment variables only
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::{
    AutoscalerConfig, ForwardTarget, InterceptorConfig, LogFormat, ObservabilityConfig,
    OperatorConfig, RoutingSourceConfig, ScalerConfig,
};
