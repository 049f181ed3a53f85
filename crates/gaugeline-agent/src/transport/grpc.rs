// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use gaugeline_core::metric::{Metric, MetricType};
use gaugeline_core::retry::{retry_with_backoff, DEFAULT_SCHEDULE};
use gaugeline_proto::{MType, MetricsClient, UpdateMetricsRequest, REAL_IP_METADATA_KEY};
use tokio_util::sync::CancellationToken;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

use super::{always_retriable, MetricsSender, SendError, SEND_DEADLINE};

/// Converts wire metrics into typed protobuf entries. Entries with an
/// unrecognized type are sent as gauges, matching how the JSON form defaults.
pub fn to_proto(batch: &[Metric]) -> Vec<gaugeline_proto::Metric> {
    batch
        .iter()
        .map(|metric| match metric.kind() {
            Ok(MetricType::Counter) => gaugeline_proto::Metric {
                id: metric.id.clone(),
                r#type: MType::Counter.into(),
                delta: metric.delta.unwrap_or_default(),
                value: 0.0,
            },
            _ => gaugeline_proto::Metric {
                id: metric.id.clone(),
                r#type: MType::Gauge.into(),
                delta: 0,
                value: metric.value.unwrap_or_default(),
            },
        })
        .collect()
}

/// Sends batches with the `Metrics/UpdateMetrics` RPC, carrying the host
/// address in `x-real-ip` metadata.
pub struct GrpcSender {
    client: Mutex<Option<MetricsClient<Channel>>>,
    real_ip: String,
    schedule: Vec<Duration>,
    cancel: CancellationToken,
}

impl GrpcSender {
    /// The channel connects lazily, so an unreachable server surfaces on the
    /// first send rather than here.
    pub fn new(
        address: &str,
        real_ip: String,
        cancel: CancellationToken,
    ) -> Result<Self, SendError> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let channel = Endpoint::from_shared(uri)
            .map_err(SendError::Endpoint)?
            .timeout(SEND_DEADLINE)
            .connect_lazy();
        Ok(GrpcSender {
            client: Mutex::new(Some(MetricsClient::new(channel))),
            real_ip,
            schedule: DEFAULT_SCHEDULE.to_vec(),
            cancel,
        })
    }

    #[must_use]
    pub fn with_retry_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.schedule = schedule;
        self
    }

    #[allow(clippy::expect_used)]
    fn client(&self) -> Option<MetricsClient<Channel>> {
        self.client.lock().expect("lock poisoned").clone()
    }

    async fn call(
        &self,
        mut client: MetricsClient<Channel>,
        message: UpdateMetricsRequest,
    ) -> Result<(), SendError> {
        let mut request = tonic::Request::new(message);
        match self.real_ip.parse::<MetadataValue<Ascii>>() {
            Ok(value) => {
                request.metadata_mut().insert(REAL_IP_METADATA_KEY, value);
            }
            Err(_) => warn!("Host address {:?} is not valid metadata", self.real_ip),
        }
        client
            .update_metrics(request)
            .await
            .map(|_| ())
            .map_err(SendError::Rpc)
    }
}

#[async_trait]
impl MetricsSender for GrpcSender {
    async fn send_batch(&self, batch: &[Metric]) -> Result<(), SendError> {
        let client = self.client().ok_or(SendError::Closed)?;
        let message = UpdateMetricsRequest {
            metrics: to_proto(batch),
        };

        let attempt = retry_with_backoff(&self.cancel, &self.schedule, always_retriable, || {
            self.call(client.clone(), message.clone())
        });
        match tokio::time::timeout(SEND_DEADLINE, attempt).await {
            Ok(result) => result?,
            Err(_) => return Err(SendError::DeadlineExceeded(SEND_DEADLINE)),
        }
        debug!("Delivered batch of {} metrics over gRPC", batch.len());
        Ok(())
    }

    async fn close(&self) {
        #[allow(clippy::expect_used)]
        let client = self.client.lock().expect("lock poisoned").take();
        if client.is_some() {
            debug!("gRPC channel closed");
        }
    }
}
