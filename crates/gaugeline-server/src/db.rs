// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Postgres mirror of the metric store.
//!
//! Each sync writes the whole store in one transaction. Connection-class
//! failures (SQLSTATE class `08` and socket errors) are retried on the
//! default backoff schedule; any other database error fails immediately.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use gaugeline_core::metric::Metric;
use gaugeline_core::retry::{retry_with_backoff, RetryError, DEFAULT_SCHEDULE};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS metrics (
        id TEXT PRIMARY KEY,
        type TEXT NOT NULL,
        delta BIGINT,
        value DOUBLE PRECISION
    )
";

const UPSERT: &str = r"
    INSERT INTO metrics (id, type, delta, value)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (id) DO UPDATE
    SET type = EXCLUDED.type,
        delta = EXCLUDED.delta,
        value = EXCLUDED.value
";

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("database operation failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: usize,
        #[source]
        source: sqlx::Error,
    },
    #[error("database operation cancelled")]
    Cancelled,
}

impl From<RetryError<sqlx::Error>> for DbError {
    fn from(err: RetryError<sqlx::Error>) -> Self {
        match err {
            RetryError::Permanent(e) => DbError::Sqlx(e),
            RetryError::Exhausted { attempts, source } => DbError::Exhausted { attempts, source },
            RetryError::Cancelled => DbError::Cancelled,
        }
    }
}

/// Whether `err` is worth retrying: a lost or refused connection.
#[must_use]
pub fn is_connection_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| code.starts_with("08")),
        _ => false,
    }
}

/// Runs `op` with the connection-class retry policy.
pub async fn with_retry<T, F, Fut>(
    cancel: &CancellationToken,
    schedule: &[Duration],
    op: F,
) -> Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    Ok(retry_with_backoff(cancel, schedule, is_connection_error, op).await?)
}

/// Durable copy of the metric store.
#[async_trait]
pub trait MetricsRepository: Send + Sync {
    /// Upserts every metric in one transaction.
    async fn sync_all(&self, metrics: &[Metric]) -> Result<(), DbError>;

    async fn ping(&self) -> Result<(), DbError>;
}

pub struct PgRepository {
    pool: PgPool,
    schedule: Vec<Duration>,
    cancel: CancellationToken,
}

impl PgRepository {
    /// Connects, retrying connection-class failures, and makes sure the
    /// `metrics` table exists.
    pub async fn connect(dsn: &str, cancel: CancellationToken) -> Result<Self, DbError> {
        let pool = with_retry(&cancel, &DEFAULT_SCHEDULE, || async move {
            PgPoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect(dsn)
                .await
        })
        .await?;
        info!("Connected to PostgreSQL");

        let repository = PgRepository {
            pool,
            schedule: DEFAULT_SCHEDULE.to_vec(),
            cancel,
        };
        repository.ensure_schema().await?;
        Ok(repository)
    }

    async fn ensure_schema(&self) -> Result<(), DbError> {
        with_retry(&self.cancel, &self.schedule, || async {
            sqlx::query(CREATE_TABLE).execute(&self.pool).await
        })
        .await?;
        debug!("Ensured metrics table exists");
        Ok(())
    }

    async fn upsert_all(&self, metrics: &[Metric]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for metric in metrics {
            sqlx::query(UPSERT)
                .bind(metric.id.as_str())
                .bind(metric.mtype.as_str())
                .bind(metric.delta)
                .bind(metric.value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl MetricsRepository for PgRepository {
    async fn sync_all(&self, metrics: &[Metric]) -> Result<(), DbError> {
        with_retry(&self.cancel, &self.schedule, || self.upsert_all(metrics)).await?;
        debug!("Synced {} metrics to the database", metrics.len());
        Ok(())
    }

    async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
