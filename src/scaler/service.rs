//! `externalscaler.ExternalScaler` implementation.
//!
//! Every RPC is a pure read of the aggregator's [`SnapshotStore`]; the service
//! holds no state of its own besides the fixed metric description.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_stream::wrappers::IntervalStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status};

use crate::config::ScalerConfig;
use crate::queue::SnapshotStore;
use crate::scaler::proto::external_scaler_server::ExternalScaler;
use crate::scaler::proto::{
    GetMetricSpecResponse, GetMetricsRequest, GetMetricsResponse, IsActiveResponse, MetricSpec,
    MetricValue, ScaledObjectRef,
};

pub type ActivityStream = Pin<Box<dyn Stream<Item = Result<IsActiveResponse, Status>> + Send>>;

/// Answers the external autoscaler from the latest published snapshot.
#[derive(Debug, Clone)]
pub struct ExternalScalerService {
    snapshot: Arc<SnapshotStore>,
    metric_name: String,
    target_size: i64,
    stream_interval: Duration,
}

impl ExternalScalerService {
    pub fn new(
        snapshot: Arc<SnapshotStore>,
        metric_name: impl Into<String>,
        target_size: i64,
        stream_interval: Duration,
    ) -> Self {
        Self {
            snapshot,
            metric_name: metric_name.into(),
            target_size,
            stream_interval,
        }
    }

    pub fn from_config(snapshot: Arc<SnapshotStore>, config: &ScalerConfig) -> Self {
        Self::new(
            snapshot,
            config.metric_name.clone(),
            config.target_pending_requests,
            Duration::from_millis(config.poll_interval_ms),
        )
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    fn active(&self) -> bool {
        self.snapshot.read().count > 0
    }

    fn current_value(&self) -> i64 {
        i64::try_from(self.snapshot.read().count).unwrap_or(i64::MAX)
    }
}

fn check_ref(scaled_object: &ScaledObjectRef) -> Result<(), Status> {
    if scaled_object.name.is_empty() {
        return Err(Status::invalid_argument("ScaledObjectRef.name must not be empty"));
    }
    Ok(())
}

#[tonic::async_trait]
impl ExternalScaler for ExternalScalerService {
    async fn is_active(
        &self,
        request: Request<ScaledObjectRef>,
    ) -> Result<Response<IsActiveResponse>, Status> {
        check_ref(request.get_ref())?;
        Ok(Response::new(IsActiveResponse {
            result: self.active(),
        }))
    }

    type StreamIsActiveStream = ActivityStream;

    async fn stream_is_active(
        &self,
        request: Request<ScaledObjectRef>,
    ) -> Result<Response<Self::StreamIsActiveStream>, Status> {
        let scaled_object = request.into_inner();
        check_ref(&scaled_object)?;
        tracing::debug!(
            name = %scaled_object.name,
            namespace = %scaled_object.namespace,
            "Activity stream opened"
        );

        let snapshot = self.snapshot.clone();
        let stream = IntervalStream::new(tokio::time::interval(self.stream_interval)).map(move |_| {
            Ok(IsActiveResponse {
                result: snapshot.read().count > 0,
            })
        });
        Ok(Response::new(Box::pin(stream)))
    }

    async fn get_metric_spec(
        &self,
        request: Request<ScaledObjectRef>,
    ) -> Result<Response<GetMetricSpecResponse>, Status> {
        check_ref(request.get_ref())?;
        Ok(Response::new(GetMetricSpecResponse {
            metric_specs: vec![MetricSpec {
                metric_name: self.metric_name.clone(),
                target_size: self.target_size,
                target_size_float: self.target_size as f64,
            }],
        }))
    }

    async fn get_metrics(
        &self,
        request: Request<GetMetricsRequest>,
    ) -> Result<Response<GetMetricsResponse>, Status> {
        let request = request.into_inner();
        let scaled_object = request
            .scaled_object_ref
            .ok_or_else(|| Status::invalid_argument("scaledObjectRef is required"))?;
        check_ref(&scaled_object)?;
        if request.metric_name != self.metric_name {
            return Err(Status::invalid_argument(format!(
                "unknown metric {:?}, this scaler serves {:?}",
                request.metric_name, self.metric_name
            )));
        }

        let value = self.current_value();
        Ok(Response::new(GetMetricsResponse {
            metric_values: vec![MetricValue {
                metric_name: self.metric_name.clone(),
                metric_value: value,
                metric_value_float: value as f64,
            }],
        }))
    }
}
