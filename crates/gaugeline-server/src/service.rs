// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transport-agnostic update path shared by the HTTP and gRPC front ends.
//!
//! An update is applied entry by entry, so a bad entry in the middle of a
//! batch leaves the entries before it applied. After the in-memory store,
//! the whole store is mirrored to the database (when configured), the
//! snapshot is rewritten (when the store interval is zero), and an audit
//! event is published.

use std::sync::Arc;

use gaugeline_core::errors::ParseError;
use gaugeline_core::metric::Metric;
use gaugeline_core::store::MetricStore;
use tracing::error;

use crate::audit::{AuditEvent, AuditManager};
use crate::db::{DbError, MetricsRepository};
use crate::persist::SnapshotFile;

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Invalid(#[from] ParseError),
    #[error("failed to save metrics")]
    Persist(#[source] DbError),
}

pub struct MetricsService {
    store: Arc<MetricStore>,
    repository: Option<Arc<dyn MetricsRepository>>,
    audit: Arc<AuditManager>,
    sync_snapshot: Option<Arc<SnapshotFile>>,
}

impl MetricsService {
    #[must_use]
    pub fn new(store: Arc<MetricStore>, audit: Arc<AuditManager>) -> Self {
        MetricsService {
            store,
            repository: None,
            audit,
            sync_snapshot: None,
        }
    }

    #[must_use]
    pub fn with_repository(mut self, repository: Arc<dyn MetricsRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Rewrites `snapshot` after every update.
    #[must_use]
    pub fn with_sync_snapshot(mut self, snapshot: Arc<SnapshotFile>) -> Self {
        self.sync_snapshot = Some(snapshot);
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    #[must_use]
    pub fn repository(&self) -> Option<&Arc<dyn MetricsRepository>> {
        self.repository.as_ref()
    }

    /// Applies `metrics` in order, stopping at the first invalid entry.
    pub fn apply(&self, metrics: &[Metric]) -> Result<(), ParseError> {
        for metric in metrics {
            if metric.id.is_empty() {
                return Err(ParseError::MissingId);
            }
            self.store.apply(&metric.to_update()?);
        }
        Ok(())
    }

    /// Mirrors the whole store to the database, if one is configured.
    pub async fn sync(&self) -> Result<(), DbError> {
        match &self.repository {
            Some(repository) => repository.sync_all(&self.store.get_all()).await,
            None => Ok(()),
        }
    }

    pub async fn persist_if_sync(&self) {
        if let Some(snapshot) = &self.sync_snapshot {
            snapshot.save(&self.store).await;
        }
    }

    pub async fn audit(&self, metrics: Vec<String>, ip_address: &str) {
        if self.audit.has_sinks() {
            self.audit
                .notify(&AuditEvent::new(metrics, ip_address))
                .await;
        }
    }

    /// Full update path: apply, database sync, snapshot, audit.
    ///
    /// The snapshot is written even when validation or the database fails,
    /// since the store may already hold part of the update.
    pub async fn update(&self, metrics: &[Metric], ip_address: &str) -> Result<(), ApplyError> {
        let result = self.apply_and_sync(metrics).await;
        self.persist_if_sync().await;
        result?;
        self.audit(metrics.iter().map(|m| m.id.clone()).collect(), ip_address)
            .await;
        Ok(())
    }

    async fn apply_and_sync(&self, metrics: &[Metric]) -> Result<(), ApplyError> {
        self.apply(metrics)?;
        self.sync().await.map_err(|e| {
            error!("Failed to sync metrics to the database: {e}");
            ApplyError::Persist(e)
        })
    }
}
