//! Configuration schema definitions.
//!
//! One document configures all three processes; each binary reads the
//! section it owns. All types derive Serde traits for deserialization from
//! config files, and every struct defaults so a missing file is valid.

use serde::{Deserialize, Serialize};

/// Root configuration shared by the interceptor, scaler and operator.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AutoscalerConfig {
    /// Logging and metrics exporter settings.
    pub observability: ObservabilityConfig,

    /// Per-application proxy sidecar.
    pub interceptor: InterceptorConfig,

    /// Queue aggregator and external scaler RPC server.
    pub scaler: ScalerConfig,

    /// Reconciliation controller and control-plane admin surface.
    pub operator: OperatorConfig,
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9091".to_string(),
        }
    }
}

/// Interceptor (proxy sidecar) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InterceptorConfig {
    /// Address the forwarding listener binds to.
    pub proxy_bind_address: String,

    /// Address the admin listener (queue depth, routing refresh) binds to.
    pub admin_bind_address: String,

    /// The single application backend this interceptor forwards to.
    pub target: ForwardTarget,

    /// Where the control plane publishes the routing table.
    pub routing_source: RoutingSourceConfig,

    /// Total time allowed for one proxied request/response, in seconds.
    pub request_timeout_secs: u64,

    /// Timeout for one routing table fetch, in seconds.
    pub routing_fetch_timeout_secs: u64,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            proxy_bind_address: "0.0.0.0:8080".to_string(),
            admin_bind_address: "0.0.0.0:9090".to_string(),
            target: ForwardTarget::default(),
            routing_source: RoutingSourceConfig::default(),
            request_timeout_secs: 30,
            routing_fetch_timeout_secs: 5,
        }
    }
}

/// Service name and port identifying the forwarding target.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardTarget {
    pub service_name: String,
    pub port: u16,
}

impl Default for ForwardTarget {
    fn default() -> Self {
        Self {
            service_name: "localhost".to_string(),
            port: 8081,
        }
    }
}

impl ForwardTarget {
    /// `host:port` authority of the bound backend.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.service_name, self.port)
    }

    /// Application the target belongs to: the first DNS label of the service.
    pub fn app_name(&self) -> &str {
        self.service_name.split('.').next().unwrap_or_default()
    }
}

/// Service name, port and path locating the control-plane routing endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingSourceConfig {
    pub service_name: String,
    pub port: u16,
    pub path: String,
}

impl Default for RoutingSourceConfig {
    fn default() -> Self {
        Self {
            service_name: "http-autoscaler-operator".to_string(),
            port: 9090,
            path: "routing".to_string(),
        }
    }
}

impl RoutingSourceConfig {
    /// URL the interceptor fetches the routing table from.
    pub fn fetch_url(&self) -> Result<url::Url, url::ParseError> {
        url::Url::parse(&format!(
            "http://{}:{}/{}",
            self.service_name,
            self.port,
            self.path.trim_start_matches('/')
        ))
    }
}

/// External scaler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScalerConfig {
    /// gRPC listener for the external autoscaler.
    pub grpc_bind_address: String,

    /// Namespace of the interceptor service whose replicas are sampled.
    pub target_namespace: String,

    /// Interceptor service whose endpoints are sampled every cycle.
    pub target_service: String,

    /// Admin port every interceptor replica serves `/queue` on.
    pub target_admin_port: u16,

    /// Path of the queue depth endpoint on each replica.
    pub queue_path: String,

    /// Fixed replica admin addresses (`host:port`). When non-empty, cluster
    /// discovery is skipped; intended for local runs.
    pub static_endpoints: Vec<String>,

    /// Polling period of the aggregator, in milliseconds.
    pub poll_interval_ms: u64,

    /// Per-replica query timeout, in milliseconds.
    pub query_timeout_ms: u64,

    /// Maximum replica queries in flight during one cycle.
    pub max_concurrent_queries: usize,

    /// Metric name reported in the metric specification.
    pub metric_name: String,

    /// Target pending requests per replica reported in the metric specification.
    pub target_pending_requests: i64,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            grpc_bind_address: "0.0.0.0:8080".to_string(),
            target_namespace: "default".to_string(),
            target_service: "app-interceptor".to_string(),
            target_admin_port: 9090,
            queue_path: "queue".to_string(),
            static_endpoints: Vec::new(),
            poll_interval_ms: 1000,
            query_timeout_ms: 500,
            max_concurrent_queries: 32,
            metric_name: "queueSize".to_string(),
            target_pending_requests: 100,
        }
    }
}

/// Operator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Namespace to watch. `None` watches every namespace.
    pub namespace: Option<String>,

    /// Bind address of the control-plane admin endpoint (`/routing`).
    pub admin_bind_address: String,

    /// Service name interceptors use to reach this operator's admin endpoint.
    pub admin_service_name: String,

    /// Namespace the operator's admin service lives in.
    pub admin_service_namespace: String,

    /// Port interceptors use to reach this operator's admin endpoint.
    pub admin_service_port: u16,

    /// Cluster-local DNS suffix appended to `<svc>.<namespace>`.
    pub cluster_domain: String,

    /// Registry prefix for the add-on images.
    pub image_registry: String,

    /// Interceptor image name (appended to the registry).
    pub interceptor_image: String,

    /// External scaler image name (appended to the registry).
    pub scaler_image: String,

    /// Port the interceptor and scaler containers listen on.
    pub exposed_port: u16,

    /// Admin port of the interceptor containers.
    pub interceptor_admin_port: u16,

    /// Delay before retrying a failed pass, in milliseconds.
    pub error_requeue_ms: u64,

    /// Follow-up interval after a successful pass, in seconds.
    pub drift_requeue_secs: u64,

    /// Field manager name used for server-side apply.
    pub field_manager: String,

    /// Apply the `HTTPScaledObject` CRD at startup.
    pub install_crd: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            admin_bind_address: "0.0.0.0:9090".to_string(),
            admin_service_name: "http-autoscaler-operator".to_string(),
            admin_service_namespace: "keda".to_string(),
            admin_service_port: 9090,
            cluster_domain: "svc.cluster.local".to_string(),
            image_registry: "ghcr.io/http-autoscaler/".to_string(),
            interceptor_image: "interceptor".to_string(),
            scaler_image: "scaler".to_string(),
            exposed_port: 8080,
            interceptor_admin_port: 9090,
            error_requeue_ms: 500,
            drift_requeue_secs: 50,
            field_manager: "http-autoscaler-operator".to_string(),
            install_crd: false,
        }
    }
}

impl OperatorConfig {
    pub fn interceptor_image_ref(&self) -> String {
        format!("{}{}", self.image_registry, self.interceptor_image)
    }

    pub fn scaler_image_ref(&self) -> String {
        format!("{}{}", self.image_registry, self.scaler_image)
    }
}
