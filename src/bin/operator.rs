//! Operator: reconciles `HTTPScaledObject`s and serves the routing table.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use http_autoscaler::config::{self, loader};
use http_autoscaler::lifecycle::{signals, Shutdown};
use http_autoscaler::observability::{logging, metrics};
use http_autoscaler::operator::controller::{self, Context, RequeuePolicy};
use http_autoscaler::operator::{admin, KubeClusterClient, KubeResourceFactory, Reconciler, RouteRegistry, Topology};

#[derive(Parser, Debug)]
#[command(name = "operator", version, about = "HTTPScaledObject operator")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "HTTP_AUTOSCALER_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace to watch; all namespaces when unset.
    #[arg(long, env = "KEDA_HTTP_OPERATOR_NAMESPACE")]
    namespace: Option<String>,

    #[arg(long)]
    admin_address: Option<String>,

    /// Namespace of the operator's own admin service, as seen by interceptors.
    #[arg(long, env = "KEDA_HTTP_OPERATOR_SERVICE_NAMESPACE")]
    admin_service_namespace: Option<String>,

    /// Apply the CRD before starting the controller.
    #[arg(long)]
    install_crd: bool,
}

impl Args {
    fn into_config(self) -> Result<config::AutoscalerConfig, config::ConfigError> {
        let mut config = loader::load_or_default(self.config.as_deref())?;
        let operator = &mut config.operator;
        if self.namespace.is_some() {
            operator.namespace = self.namespace;
        }
        if let Some(v) = self.admin_address {
            operator.admin_bind_address = v;
        }
        if let Some(v) = self.admin_service_namespace {
            operator.admin_service_namespace = v;
        }
        operator.install_crd |= self.install_crd;
        loader::finish(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config()?;
    logging::init_logging(&config.observability, "kube=info,tower=warn");

    tracing::info!("operator v{} starting", env!("CARGO_PKG_VERSION"));
    let operator_config = &config.operator;

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let client = kube::Client::try_default().await?;
    if operator_config.install_crd {
        controller::install_crd(client.clone(), &operator_config.field_manager).await?;
    }

    let registry = Arc::new(RouteRegistry::new());
    let topology = Topology::from(operator_config);
    let reconciler = Reconciler::new(
        Arc::new(KubeClusterClient::new(client.clone(), operator_config.field_manager.clone())),
        Arc::new(KubeResourceFactory),
        topology,
        registry.clone(),
    );
    let ctx = Arc::new(Context {
        reconciler,
        requeue: RequeuePolicy::from(operator_config),
    });

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let admin_listener = TcpListener::bind(&operator_config.admin_bind_address).await?;
    let admin_task = tokio::spawn(admin::serve(admin_listener, registry, shutdown.clone()));

    controller::run(client, operator_config.namespace.as_deref(), ctx, shutdown.clone()).await;

    shutdown.trigger();
    match admin_task.await {
        Ok(Err(e)) => tracing::error!(error = %e, "Admin endpoint failed"),
        Err(e) => tracing::error!(error = %e, "Admin endpoint task panicked"),
        Ok(Ok(())) => {}
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
