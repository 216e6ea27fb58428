//! Periodic queue depth aggregation.
//!
//! # Responsibilities
//! - Re-discover the replica set every period
//! - Query every replica's pending count concurrently, bounded by a
//!   per-cycle concurrency cap and a per-query timeout
//! - Sum the successful answers and publish `(sum, now)`
//!
//! # Design Decisions
//! - A failed query contributes zero and is not retried; it is only counted
//!   in metrics and logged at debug level
//! - A failed discovery publishes nothing, so the previous snapshot stays
//! - The cycle future is raced against shutdown; dropping it cancels every
//!   outstanding query

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::ScalerConfig;
use crate::observability::metrics;
use crate::queue::discovery::{BackendEndpoint, DiscoveryError, EndpointDiscovery};
use crate::queue::snapshot::{QueueSnapshot, SnapshotStore};

/// Why one replica's count was dropped.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("replica answered {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed queue depth body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Accepted shapes of a replica's `/queue` body.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QueueDepthBody {
    Count(u64),
    Legacy { current_size: u64 },
}

impl QueueDepthBody {
    fn count(&self) -> u64 {
        match self {
            QueueDepthBody::Count(n) => *n,
            QueueDepthBody::Legacy { current_size } => *current_size,
        }
    }
}

/// Timing and fan-out limits of the aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub interval: Duration,
    pub query_timeout: Duration,
    pub max_concurrent_queries: usize,
    pub queue_path: String,
}

impl From<&ScalerConfig> for AggregatorSettings {
    fn from(config: &ScalerConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            query_timeout: Duration::from_millis(config.query_timeout_ms),
            max_concurrent_queries: config.max_concurrent_queries.max(1),
            queue_path: config.queue_path.clone(),
        }
    }
}

/// Outcome of one polling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub endpoints: usize,
    pub failed: usize,
    pub total: u64,
}

/// Samples every live replica and publishes the summed depth.
pub struct QueueAggregator {
    discovery: Arc<dyn EndpointDiscovery>,
    client: reqwest::Client,
    settings: AggregatorSettings,
    snapshot: Arc<SnapshotStore>,
}

impl QueueAggregator {
    pub fn new(
        discovery: Arc<dyn EndpointDiscovery>,
        settings: AggregatorSettings,
        snapshot: Arc<SnapshotStore>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.query_timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            discovery,
            client,
            settings,
            snapshot,
        })
    }

    /// The store this aggregator publishes into.
    pub fn snapshot(&self) -> Arc<SnapshotStore> {
        self.snapshot.clone()
    }

    /// Latest published pair.
    pub fn read(&self) -> QueueSnapshot {
        self.snapshot.read()
    }

    /// Poll every `interval` until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            query_timeout_ms = self.settings.query_timeout.as_millis() as u64,
            max_concurrent = self.settings.max_concurrent_queries,
            "Queue aggregator starting"
        );

        let mut ticker = time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }

            tokio::select! {
                result = self.poll_once() => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Endpoint discovery failed, keeping previous snapshot");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        tracing::info!("Queue aggregator received shutdown signal, exiting loop");
    }

    /// Run a single cycle: discover, fan out, sum, publish.
    pub async fn poll_once(&self) -> Result<CycleReport, DiscoveryError> {
        let endpoints = self.discovery.discover().await?;
        let endpoint_count = endpoints.len();

        let results: Vec<Result<u64, QueryError>> = stream::iter(endpoints)
            .map(|endpoint| async move {
                let result = self.query(&endpoint).await;
                if let Err(e) = &result {
                    tracing::debug!(endpoint = %endpoint.url(&self.settings.queue_path), error = %e, "Dropping replica count");
                    metrics::record_endpoint_failure();
                }
                result
            })
            .buffer_unordered(self.settings.max_concurrent_queries)
            .collect()
            .await;

        let mut total: u64 = 0;
        let mut failed = 0;
        for result in results {
            match result {
                Ok(count) => total = total.saturating_add(count),
                Err(_) => failed += 1,
            }
        }

        self.snapshot.publish(total);
        metrics::set_queue_depth(total);
        tracing::debug!(endpoints = endpoint_count, failed, total, "Queue depth published");

        Ok(CycleReport {
            endpoints: endpoint_count,
            failed,
            total,
        })
    }

    /// Ask one replica for its pending count.
    pub async fn query(&self, endpoint: &BackendEndpoint) -> Result<u64, QueryError> {
        let url = endpoint.url(&self.settings.queue_path);
        let fetch = async {
            let response = self.client.get(&url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(QueryError::Status(status));
            }
            let body = response.bytes().await?;
            let parsed: QueueDepthBody = serde_json::from_slice(&body)?;
            Ok(parsed.count())
        };

        match time::timeout(self.settings.query_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout(self.settings.query_timeout)),
        }
    }
}
