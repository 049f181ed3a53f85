// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use async_trait::async_trait;
use gaugeline_core::codec::{encode_batch, BatchBuffers};
use gaugeline_core::crypto::Encryptor;
use gaugeline_core::metric::Metric;
use gaugeline_core::pool::Pool;
use gaugeline_core::retry::{retry_with_backoff, DEFAULT_SCHEDULE};
use gaugeline_core::signing::Signer;
use gaugeline_core::{ENCRYPTED_HEADER, REAL_IP_HEADER, SIGNATURE_HEADER};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{always_retriable, MetricsSender, SendError, SEND_DEADLINE};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_IDLE_BUFFERS: usize = 8;

/// Posts gzip-compressed JSON batches to `/updates/`.
///
/// The signature covers the compressed plaintext; encryption, when enabled,
/// is applied after signing.
pub struct HttpSender {
    client: reqwest::Client,
    url: String,
    real_ip: String,
    signer: Option<Signer>,
    encryptor: Option<Encryptor>,
    buffers: Pool<BatchBuffers>,
    schedule: Vec<Duration>,
    deadline: Duration,
    cancel: CancellationToken,
}

impl HttpSender {
    /// `address` is `host:port`; a full `http://` or `https://` base URL is
    /// also accepted.
    pub fn new(
        address: &str,
        real_ip: String,
        signer: Option<Signer>,
        encryptor: Option<Encryptor>,
        cancel: CancellationToken,
    ) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(SendError::Request)?;
        let base = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{address}")
        };
        Ok(HttpSender {
            client,
            url: format!("{base}/updates/"),
            real_ip,
            signer,
            encryptor,
            buffers: Pool::new(MAX_IDLE_BUFFERS, BatchBuffers::default),
            schedule: DEFAULT_SCHEDULE.to_vec(),
            deadline: SEND_DEADLINE,
            cancel,
        })
    }

    #[must_use]
    pub fn with_retry_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.schedule = schedule;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    async fn post(&self, body: &[u8], signature: Option<&str>) -> Result<(), SendError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header(REAL_IP_HEADER, &self.real_ip)
            .body(body.to_vec());
        if self.encryptor.is_some() {
            request = request.header(ENCRYPTED_HEADER, "true");
        }
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.send().await.map_err(SendError::Request)?;
        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(SendError::UnexpectedStatus(status.as_u16())),
        }
    }
}

#[async_trait]
impl MetricsSender for HttpSender {
    async fn send_batch(&self, batch: &[Metric]) -> Result<(), SendError> {
        let (body, signature) = {
            let mut buffers = self.buffers.get();
            let compressed = encode_batch(batch, &mut buffers)?;
            let signature = self.signer.as_ref().map(|s| s.sign(compressed));
            let body = match &self.encryptor {
                Some(encryptor) => encryptor.encrypt(compressed)?,
                None => compressed.to_vec(),
            };
            (body, signature)
        };

        let attempt = retry_with_backoff(&self.cancel, &self.schedule, always_retriable, || {
            self.post(&body, signature.as_deref())
        });
        match tokio::time::timeout(self.deadline, attempt).await {
            Ok(result) => result?,
            Err(_) => return Err(SendError::DeadlineExceeded(self.deadline)),
        }
        debug!("Delivered batch of {} metrics to {}", batch.len(), self.url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn gunzip(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn address_without_scheme_gets_http() {
        let sender =
            HttpSender::new("localhost:8080", String::new(), None, None, CancellationToken::new())
                .unwrap();
        assert_eq!(sender.url, "http://localhost:8080/updates/");

        let sender = HttpSender::new(
            "http://127.0.0.1:1234/",
            String::new(),
            None,
            None,
            CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(sender.url, "http://127.0.0.1:1234/updates/");
    }

    #[tokio::test]
    async fn posts_signed_gzip_batch_with_headers() {
        let mut server = mockito::Server::new_async().await;
        let signer = Signer::new("secret").unwrap();
        let batch = vec![Metric::gauge("Alloc", 2.5), Metric::counter("PollCount", 1)];

        let mock = server
            .mock("POST", "/updates/")
            .match_header("content-encoding", "gzip")
            .match_header("content-type", "application/json")
            .match_header("x-real-ip", "10.1.2.3")
            .match_header("hashsha256", mockito::Matcher::Regex("^[0-9a-f]{64}$".into()))
            .match_header("x-encrypted", mockito::Matcher::Missing)
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let sender = HttpSender::new(
            &server.url(),
            "10.1.2.3".to_string(),
            Some(signer),
            None,
            CancellationToken::new(),
        )
        .unwrap();
        sender.send_batch(&batch).await.unwrap();
        mock.assert_async().await;
        assert_eq!(sender.buffers.idle(), 1);
    }

    #[tokio::test]
    async fn signature_covers_the_compressed_body() {
        let mut server = mockito::Server::new_async().await;
        let received = std::sync::Arc::new(std::sync::Mutex::new(None));
        let captured = std::sync::Arc::clone(&received);
        let mock = server
            .mock("POST", "/updates/")
            .with_status(200)
            .with_body_from_request(move |request| {
                let signature = request
                    .header("hashsha256")
                    .first()
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                *captured.lock().unwrap() = Some((request.body().unwrap().clone(), signature));
                Vec::new()
            })
            .create_async()
            .await;

        let sender = HttpSender::new(
            &server.url(),
            "127.0.0.1".to_string(),
            Signer::new("secret"),
            None,
            CancellationToken::new(),
        )
        .unwrap();
        sender
            .send_batch(&[Metric::counter("PollCount", 9)])
            .await
            .unwrap();
        mock.assert_async().await;

        let (body, signature) = received.lock().unwrap().take().unwrap();
        assert!(Signer::new("secret")
            .unwrap()
            .verify(&body, &signature.unwrap()));
        let metrics: Vec<Metric> = serde_json::from_slice(&gunzip(&body)).unwrap();
        assert_eq!(metrics, vec![Metric::counter("PollCount", 9)]);
    }

    #[tokio::test]
    async fn non_200_is_retried_then_reported() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/updates/")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let sender = HttpSender::new(
            &server.url(),
            "127.0.0.1".to_string(),
            None,
            None,
            CancellationToken::new(),
        )
        .unwrap()
        .with_retry_schedule(vec![Duration::from_millis(10), Duration::from_millis(10)]);

        let err = sender
            .send_batch(&[Metric::gauge("Alloc", 1.0)])
            .await
            .unwrap_err();
        mock.assert_async().await;
        assert!(matches!(
            err,
            SendError::Exhausted { attempts: 3, ref source } if matches!(**source, SendError::UnexpectedStatus(500))
        ));
        assert_eq!(sender.buffers.idle(), 1);
    }

    #[tokio::test]
    async fn deadline_bounds_the_whole_send() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/updates/")
            .with_status(503)
            .create_async()
            .await;

        let sender = HttpSender::new(
            &server.url(),
            "127.0.0.1".to_string(),
            None,
            None,
            CancellationToken::new(),
        )
        .unwrap()
        .with_retry_schedule(vec![Duration::from_secs(30)])
        .with_deadline(Duration::from_millis(200));

        let err = sender
            .send_batch(&[Metric::gauge("Alloc", 1.0)])
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::DeadlineExceeded(_)));
    }
}
