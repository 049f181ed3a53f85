// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! gRPC front end.
//!
//! Unlike the HTTP API, calls here are gated on the caller's `x-real-ip`
//! metadata when a trusted subnet is configured.

use std::net::IpAddr;
use std::sync::Arc;

use gaugeline_core::metric::Metric;
use gaugeline_core::net::TrustedSubnet;
use gaugeline_proto::{
    MType, Metrics, MetricsServer, UpdateMetricsRequest, UpdateMetricsResponse,
    REAL_IP_METADATA_KEY,
};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tonic::service::Interceptor;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::debug;

use crate::service::{ApplyError, MetricsService};

/// Proto entries keep an unrecognized type tag as its number so the service
/// reports it the same way as an unknown JSON type.
fn from_proto(metric: gaugeline_proto::Metric) -> Metric {
    match MType::try_from(metric.r#type) {
        Ok(MType::Gauge) => Metric::gauge(metric.id, metric.value),
        Ok(MType::Counter) => Metric::counter(metric.id, metric.delta),
        Err(_) => Metric {
            id: metric.id,
            mtype: metric.r#type.to_string(),
            delta: None,
            value: None,
        },
    }
}

fn real_ip(metadata: &MetadataMap) -> Option<&str> {
    metadata
        .get(REAL_IP_METADATA_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

pub struct MetricsGrpcService {
    service: Arc<MetricsService>,
}

impl MetricsGrpcService {
    #[must_use]
    pub fn new(service: Arc<MetricsService>) -> Self {
        MetricsGrpcService { service }
    }
}

#[tonic::async_trait]
impl Metrics for MetricsGrpcService {
    async fn update_metrics(
        &self,
        request: Request<UpdateMetricsRequest>,
    ) -> Result<Response<UpdateMetricsResponse>, Status> {
        let ip = real_ip(request.metadata()).unwrap_or_default().to_string();
        let metrics: Vec<Metric> = request
            .into_inner()
            .metrics
            .into_iter()
            .map(from_proto)
            .collect();

        match self.service.update(&metrics, &ip).await {
            Ok(()) => {
                debug!("Accepted {} metrics over gRPC from {ip}", metrics.len());
                Ok(Response::new(UpdateMetricsResponse {}))
            }
            Err(ApplyError::Invalid(e)) => Err(Status::invalid_argument(e.to_string())),
            Err(e @ ApplyError::Persist(_)) => Err(Status::internal(e.to_string())),
        }
    }
}

/// Rejects calls whose `x-real-ip` is missing, malformed or outside the
/// trusted subnet. Without a subnet every call passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedSubnetInterceptor {
    subnet: Option<TrustedSubnet>,
}

impl TrustedSubnetInterceptor {
    #[must_use]
    pub fn new(subnet: Option<TrustedSubnet>) -> Self {
        TrustedSubnetInterceptor { subnet }
    }

    pub fn check(&self, metadata: &MetadataMap) -> Result<(), Status> {
        let Some(subnet) = &self.subnet else {
            return Ok(());
        };
        let Some(raw) = real_ip(metadata) else {
            return Err(Status::permission_denied("missing x-real-ip"));
        };
        match raw.parse::<IpAddr>() {
            Ok(ip) if subnet.contains(&ip) => Ok(()),
            _ => {
                debug!("Rejected gRPC call from {raw}: outside {subnet}");
                Err(Status::permission_denied("ip not allowed"))
            }
        }
    }
}

impl Interceptor for TrustedSubnetInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        self.check(request.metadata())?;
        Ok(request)
    }
}

/// Serves the `Metrics` service on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    service: Arc<MetricsService>,
    subnet: Option<TrustedSubnet>,
    shutdown: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    let metrics = MetricsServer::with_interceptor(
        MetricsGrpcService::new(service),
        TrustedSubnetInterceptor::new(subnet),
    );
    Server::builder()
        .add_service(metrics)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            shutdown.cancelled().await;
            debug!("gRPC server | Shutdown signal received, shutting down");
        })
        .await
}
