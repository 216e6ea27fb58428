//! External scaler gRPC server.
//!
//! # Data Flow
//! ```text
//! KEDA poll (IsActive / GetMetricSpec / GetMetrics / StreamIsActive)
//!     → service.rs (validate ScaledObjectRef, read snapshot)
//!     → response built from (count, observed_at)
//! ```

pub mod service;

pub mod proto {
    tonic::include_proto!("externalscaler");
}

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;

use crate::lifecycle::Shutdown;
use proto::external_scaler_server::ExternalScalerServer;

pub use service::ExternalScalerService;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Bind `addr` and serve until shutdown.
pub async fn serve(addr: &str, service: ExternalScalerService, shutdown: Shutdown) -> Result<(), ServeError> {
    let listener = TcpListener::bind(addr).await.map_err(|source| ServeError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    serve_on(listener, service, shutdown).await
}

/// Serve on an already bound listener until shutdown.
pub async fn serve_on(
    listener: TcpListener,
    service: ExternalScalerService,
    shutdown: Shutdown,
) -> Result<(), ServeError> {
    let local: Option<SocketAddr> = listener.local_addr().ok();
    tracing::info!(address = ?local, metric = %service.metric_name(), "External scaler listening");

    tonic::transport::Server::builder()
        .add_service(ExternalScalerServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown.signalled())
        .await?;

    tracing::info!("External scaler stopped");
    Ok(())
}
