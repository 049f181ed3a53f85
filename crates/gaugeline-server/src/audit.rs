// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Audit fan-out.
//!
//! Every accepted update produces one [`AuditEvent`] which is handed to each
//! attached sink in attach order. Delivery is best effort: a failing sink is
//! logged and skipped, never retried, and never fails the request.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const HTTP_SINK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unix seconds
    pub ts: i64,
    pub metrics: Vec<String>,
    pub ip_address: String,
}

impl AuditEvent {
    pub fn new(metrics: Vec<String>, ip_address: impl Into<String>) -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        AuditEvent {
            ts,
            metrics,
            ip_address: ip_address.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("failed to write audit file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize audit event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to send audit event: {0}")]
    Request(#[from] reqwest::Error),
    #[error("audit server returned status {0}")]
    UnexpectedStatus(u16),
}

/// Appends one JSON line per event.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileSink {
    /// Creates the parent directory up front; a failure there is only logged
    /// and resurfaces on the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Failed to create audit directory {}: {e}", parent.display());
            }
        }
        FileSink {
            path,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let write_err = |source| AuditError::Write {
            path: self.path.display().to_string(),
            source,
        };
        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(write_err)?;
        file.write_all(&line).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)
    }
}

/// POSTs each event as JSON; 200 and 201 count as delivered.
#[derive(Debug)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>) -> Result<Self, AuditError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_SINK_TIMEOUT)
            .build()?;
        Ok(HttpSink {
            client,
            url: url.into(),
        })
    }

    async fn send(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let body = serde_json::to_vec(event)?;
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            status => Err(AuditError::UnexpectedStatus(status.as_u16())),
        }
    }
}

#[derive(Debug)]
pub enum AuditSink {
    File(FileSink),
    Http(HttpSink),
}

impl AuditSink {
    pub async fn publish(&self, event: &AuditEvent) -> Result<(), AuditError> {
        match self {
            AuditSink::File(sink) => sink.write(event).await,
            AuditSink::Http(sink) => sink.send(event).await,
        }
    }
}

impl fmt::Display for AuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditSink::File(sink) => write!(f, "file:{}", sink.path.display()),
            AuditSink::Http(sink) => write!(f, "http:{}", sink.url),
        }
    }
}

/// Handle returned by [`AuditManager::attach`], used to detach the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

#[derive(Debug, Default)]
pub struct AuditManager {
    sinks: Mutex<Vec<(SinkId, Arc<AuditSink>)>>,
    next_id: AtomicU64,
}

impl AuditManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, sink: AuditSink) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!("Attaching audit sink {sink}");
        #[allow(clippy::expect_used)]
        self.sinks
            .lock()
            .expect("lock poisoned")
            .push((id, Arc::new(sink)));
        id
    }

    /// Returns `false` when `id` was not attached.
    pub fn detach(&self, id: SinkId) -> bool {
        #[allow(clippy::expect_used)]
        let mut sinks = self.sinks.lock().expect("lock poisoned");
        let before = sinks.len();
        sinks.retain(|(sink_id, _)| *sink_id != id);
        sinks.len() != before
    }

    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn has_sinks(&self) -> bool {
        !self.sinks.lock().expect("lock poisoned").is_empty()
    }

    /// Delivers `event` to every sink in attach order.
    pub async fn notify(&self, event: &AuditEvent) {
        let sinks: Vec<Arc<AuditSink>> = {
            #[allow(clippy::expect_used)]
            let sinks = self.sinks.lock().expect("lock poisoned");
            sinks.iter().map(|(_, sink)| Arc::clone(sink)).collect()
        };
        for sink in sinks {
            if let Err(e) = sink.publish(event).await {
                warn!("Audit sink {sink} failed: {e}");
            }
        }
    }
}
