//! External scaler: aggregates interceptor queue depth and serves it to KEDA.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use http_autoscaler::config::{self, loader};
use http_autoscaler::lifecycle::{signals, Shutdown};
use http_autoscaler::observability::{logging, metrics};
use http_autoscaler::queue::{
    AggregatorSettings, EndpointDiscovery, KubeEndpointDiscovery, QueueAggregator, SnapshotStore, StaticDiscovery,
};
use http_autoscaler::scaler::{self, ExternalScalerService};

#[derive(Parser, Debug)]
#[command(name = "scaler", version, about = "KEDA external scaler for HTTP queue depth")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "HTTP_AUTOSCALER_CONFIG")]
    config: Option<PathBuf>,

    /// gRPC port, bound on all interfaces.
    #[arg(long, env = "KEDA_HTTP_SCALER_PORT")]
    port: Option<u16>,

    /// Namespace of the interceptor service to sample.
    #[arg(long, env = "KEDA_HTTP_SCALER_TARGET_NAMESPACE")]
    target_namespace: Option<String>,

    #[arg(long, env = "KEDA_HTTP_SCALER_TARGET_SERVICE")]
    target_service: Option<String>,

    #[arg(long, env = "KEDA_HTTP_SCALER_TARGET_ADMIN_PORT")]
    target_admin_port: Option<u16>,

    /// Fixed `host:port` replicas; skips Kubernetes discovery.
    #[arg(long = "endpoint", value_delimiter = ',')]
    endpoints: Vec<String>,
}

impl Args {
    fn into_config(self) -> Result<config::AutoscalerConfig, config::ConfigError> {
        let mut config = loader::load_or_default(self.config.as_deref())?;
        let scaler = &mut config.scaler;
        if let Some(port) = self.port {
            scaler.grpc_bind_address = format!("0.0.0.0:{}", port);
        }
        if let Some(v) = self.target_namespace {
            scaler.target_namespace = v;
        }
        if let Some(v) = self.target_service {
            scaler.target_service = v;
        }
        if let Some(v) = self.target_admin_port {
            scaler.target_admin_port = v;
        }
        if !self.endpoints.is_empty() {
            scaler.static_endpoints = self.endpoints;
        }
        loader::finish(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config()?;
    logging::init_logging(&config.observability, "h2=warn,tower=warn");

    tracing::info!("scaler v{} starting", env!("CARGO_PKG_VERSION"));
    let scaler_config = &config.scaler;

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let discovery: Arc<dyn EndpointDiscovery> = if scaler_config.static_endpoints.is_empty() {
        let client = kube::Client::try_default().await?;
        tracing::info!(
            namespace = %scaler_config.target_namespace,
            service = %scaler_config.target_service,
            admin_port = scaler_config.target_admin_port,
            "Discovering interceptor replicas from Endpoints"
        );
        Arc::new(KubeEndpointDiscovery::new(
            client,
            &scaler_config.target_namespace,
            &scaler_config.target_service,
            scaler_config.target_admin_port,
        ))
    } else {
        tracing::info!(endpoints = ?scaler_config.static_endpoints, "Using static interceptor replicas");
        Arc::new(StaticDiscovery::from_addresses(&scaler_config.static_endpoints))
    };

    let snapshot = Arc::new(SnapshotStore::new());
    let aggregator = QueueAggregator::new(discovery, AggregatorSettings::from(scaler_config), snapshot.clone())?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let aggregator_task = tokio::spawn(aggregator.run(shutdown.subscribe()));

    let service = ExternalScalerService::from_config(snapshot, scaler_config);
    let served = scaler::serve(&scaler_config.grpc_bind_address, service, shutdown.clone()).await;

    shutdown.trigger();
    if let Err(e) = aggregator_task.await {
        tracing::error!(error = %e, "Aggregator task panicked");
    }
    served?;

    tracing::info!("Shutdown complete");
    Ok(())
}
