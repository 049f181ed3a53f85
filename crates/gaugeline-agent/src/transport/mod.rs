// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of metric batches to the server.
//!
//! [`HttpSender`] and [`GrpcSender`] implement the same [`MetricsSender`]
//! contract; which one the agent uses is decided once at startup.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gaugeline_core::errors::{CodecError, CryptoError};
use gaugeline_core::metric::Metric;
use gaugeline_core::retry::RetryError;

use crate::config::Config;

pub mod grpc;
pub mod http;

pub use grpc::GrpcSender;
pub use http::HttpSender;

/// Upper bound for one `send_batch` call, retries included.
pub const SEND_DEADLINE: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("failed to encode batch: {0}")]
    Encode(#[from] CodecError),
    #[error("failed to encrypt batch: {0}")]
    Encrypt(#[from] CryptoError),
    #[error("failed to POST metrics batch: {0}")]
    Request(#[source] reqwest::Error),
    #[error("unexpected status: {0}")]
    UnexpectedStatus(u16),
    #[error("failed to send metrics via gRPC: {0}")]
    Rpc(#[source] tonic::Status),
    #[error("invalid gRPC endpoint: {0}")]
    Endpoint(#[source] tonic::transport::Error),
    #[error("sender is closed")]
    Closed,
    #[error("operation failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: usize,
        #[source]
        source: Box<SendError>,
    },
    #[error("send cancelled")]
    Cancelled,
    #[error("send did not complete within {0:?}")]
    DeadlineExceeded(Duration),
}

impl From<RetryError<SendError>> for SendError {
    fn from(err: RetryError<SendError>) -> Self {
        match err {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { attempts, source } => SendError::Exhausted {
                attempts,
                source: Box::new(source),
            },
            RetryError::Cancelled => SendError::Cancelled,
        }
    }
}

/// Network delivery errors are always worth another attempt.
pub(crate) fn always_retriable(_: &SendError) -> bool {
    true
}

#[async_trait]
pub trait MetricsSender: Send + Sync {
    async fn send_batch(&self, batch: &[Metric]) -> Result<(), SendError>;

    /// Releases connections. Sending after `close` is an error.
    async fn close(&self) {}
}

/// Picks the gRPC sender when a gRPC address is configured, HTTP otherwise.
pub fn from_config(
    config: &Config,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<Arc<dyn MetricsSender>, SendError> {
    let real_ip = gaugeline_core::net::resolve_host_ip().to_string();
    match &config.grpc_address {
        Some(grpc_address) => Ok(Arc::new(GrpcSender::new(grpc_address, real_ip, cancel)?)),
        None => {
            let signer = config
                .key
                .as_deref()
                .and_then(gaugeline_core::signing::Signer::new);
            let encryptor = config
                .crypto_key
                .as_deref()
                .map(gaugeline_core::crypto::Encryptor::from_file)
                .transpose()?;
            Ok(Arc::new(HttpSender::new(
                &config.address,
                real_ip,
                signer,
                encryptor,
                cancel,
            )?))
        }
    }
}
