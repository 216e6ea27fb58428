//! Interceptor: per-application reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────┐
//!                         │                 INTERCEPTOR                  │
//!     Client Request      │  ┌─────────┐    ┌───────────┐                │
//!     ────────────────────┼─▶│  http   │───▶│ forwarder │────────────────┼──▶ App Service
//!                         │  │ server  │    │ (pending) │                │
//!                         │  └─────────┘    └─────┬─────┘                │
//!                         │                       │ lookup               │
//!                         │                 ┌─────▼─────┐   GET /routing │
//!                         │                 │  routing  │◀───────────────┼─── Operator
//!                         │                 │   table   │                │
//!                         │                 └───────────┘                │
//!                         │  ┌─────────────────────────┐   GET /queue    │
//!                         │  │ admin (queue, routing)  │◀────────────────┼─── Scaler
//!                         │  └─────────────────────────┘                 │
//!                         └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use http_autoscaler::admin::{self, AdminState};
use http_autoscaler::config::{self, loader};
use http_autoscaler::http::{Forwarder, HttpServer};
use http_autoscaler::lifecycle::{signals, Shutdown};
use http_autoscaler::observability::{logging, metrics};
use http_autoscaler::routing::{Backend, RoutingSync, RoutingTable};

#[derive(Parser, Debug)]
#[command(name = "interceptor", version, about = "Per-application HTTP interceptor")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "HTTP_AUTOSCALER_CONFIG")]
    config: Option<PathBuf>,

    /// Service the interceptor forwards to.
    #[arg(long, env = "KEDA_HTTP_SERVICE_NAME")]
    service_name: Option<String>,

    #[arg(long, env = "KEDA_HTTP_SERVICE_PORT")]
    service_port: Option<u16>,

    /// Service hosting the control-plane routing endpoint.
    #[arg(long, env = "KEDA_HTTP_OPERATOR_SERVICE_NAME")]
    operator_service_name: Option<String>,

    #[arg(long, env = "KEDA_HTTP_OPERATOR_SERVICE_PORT")]
    operator_service_port: Option<u16>,

    #[arg(long, env = "KEDA_HTTP_OPERATOR_ROUTING_TABLE_PATH")]
    routing_table_path: Option<String>,

    #[arg(long)]
    proxy_address: Option<String>,

    #[arg(long)]
    admin_address: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<config::AutoscalerConfig, config::ConfigError> {
        let mut config = loader::load_or_default(self.config.as_deref())?;
        let interceptor = &mut config.interceptor;
        if let Some(v) = self.service_name {
            interceptor.target.service_name = v;
        }
        if let Some(v) = self.service_port {
            interceptor.target.port = v;
        }
        if let Some(v) = self.operator_service_name {
            interceptor.routing_source.service_name = v;
        }
        if let Some(v) = self.operator_service_port {
            interceptor.routing_source.port = v;
        }
        if let Some(v) = self.routing_table_path {
            interceptor.routing_source.path = v;
        }
        if let Some(v) = self.proxy_address {
            interceptor.proxy_bind_address = v;
        }
        if let Some(v) = self.admin_address {
            interceptor.admin_bind_address = v;
        }
        loader::finish(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config()?;
    logging::init_logging(&config.observability, "tower_http=info");

    tracing::info!("interceptor v{} starting", env!("CARGO_PKG_VERSION"));

    let interceptor = &config.interceptor;
    let routing_url = interceptor.routing_source.fetch_url()?;
    tracing::info!(
        target_service = %interceptor.target.authority(),
        routing_source = %routing_url,
        proxy_address = %interceptor.proxy_bind_address,
        admin_address = %interceptor.admin_bind_address,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let table = Arc::new(RoutingTable::new());
    let sync = Arc::new(RoutingSync::new(
        routing_url,
        table.clone(),
        Duration::from_secs(interceptor.routing_fetch_timeout_secs),
    )?);
    if let Err(e) = sync.sync().await {
        tracing::warn!(error = %e, "Initial routing sync failed, starting with an empty table");
    }

    let bound = Backend::new(interceptor.target.service_name.clone(), interceptor.target.port);
    let forwarder = Arc::new(Forwarder::new(interceptor.target.app_name(), bound, table));

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let proxy_listener = TcpListener::bind(&interceptor.proxy_bind_address).await?;
    let admin_listener = TcpListener::bind(&interceptor.admin_bind_address).await?;

    let admin_state = AdminState {
        pending: forwarder.pending().clone(),
        sync,
    };
    let admin_task = tokio::spawn(admin::serve(admin_listener, admin_state, shutdown.clone()));

    let server = HttpServer::new(interceptor, forwarder);
    server.run(proxy_listener, shutdown.clone()).await?;

    shutdown.trigger();
    match admin_task.await {
        Ok(Err(e)) => tracing::error!(error = %e, "Admin server failed"),
        Err(e) => tracing::error!(error = %e, "Admin server task panicked"),
        Ok(Ok(())) => {}
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
