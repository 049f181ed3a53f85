// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry with a fixed backoff schedule.
//!
//! An operation runs once, and after each retriable failure waits for the
//! next delay in the schedule before running again, so a schedule of `n`
//! delays allows at most `n + 1` attempts. Callers decide which errors are
//! retriable: delivery treats every error as transient, database access only
//! connection-class failures.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const DEFAULT_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation failed with an error the caller does not retry.
    #[error("{0}")]
    Permanent(E),
    #[error("operation failed after {attempts} attempts: {source}")]
    Exhausted { attempts: usize, source: E },
    #[error("operation cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// The last underlying failure, if the operation ran at all.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Permanent(e) | RetryError::Exhausted { source: e, .. } => Some(e),
            RetryError::Cancelled => None,
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-retriable error, runs out of
/// schedule, or `cancel` fires during a wait.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    cancel: &CancellationToken,
    schedule: &[Duration],
    is_retriable: R,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !is_retriable(&err) {
            return Err(RetryError::Permanent(err));
        }
        let Some(wait) = schedule.get(attempt - 1).copied() else {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                source: err,
            });
        };
        warn!(
            "Retriable error: {err} (attempt {attempt}/{}). Retrying in {wait:?}",
            schedule.len() + 1
        );
        tokio::select! {
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            () = tokio::time::sleep(wait) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient(usize),
        Fatal,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient(n) => write!(f, "transient #{n}"),
                TestError::Fatal => f.write_str("fatal"),
            }
        }
    }

    fn transient(e: &TestError) -> bool {
        matches!(e, TestError::Transient(_))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();
        let result = retry_with_backoff(&CancellationToken::new(), &DEFAULT_SCHEDULE, transient, || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(TestError::Transient(n))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retriable_error_returns_immediately() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> =
            retry_with_backoff(&CancellationToken::new(), &DEFAULT_SCHEDULE, transient, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Permanent(TestError::Fatal))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_wraps_last_cause() {
        let calls = AtomicUsize::new(0);
        let started = Instant::now();
        let result: Result<(), _> =
            retry_with_backoff(&CancellationToken::new(), &DEFAULT_SCHEDULE, transient, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(TestError::Transient(n)) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(
            err.to_string(),
            "operation failed after 4 attempts: transient #4"
        );
        assert!(matches!(
            err,
            RetryError::Exhausted {
                attempts: 4,
                source: TestError::Transient(4)
            }
        ));
        assert_eq!(started.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_the_wait() {
        let cancel = CancellationToken::new();
        let calls = AtomicUsize::new(0);
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result: Result<(), _> = retry_with_backoff(&cancel, &DEFAULT_SCHEDULE, transient, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(TestError::Transient(n)) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn empty_schedule_means_single_attempt() {
        let result: Result<(), _> =
            retry_with_backoff(&CancellationToken::new(), &[], transient, || async {
                Err(TestError::Transient(1))
            })
            .await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
    }
}
