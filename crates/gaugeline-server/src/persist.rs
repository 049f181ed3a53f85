// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gaugeline_core::errors::SnapshotError;
use gaugeline_core::snapshot::{load_from_file, save_to_file};
use gaugeline_core::store::MetricStore;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// The on-disk snapshot shared by every writer in the process.
///
/// Saves are serialised and run on the blocking pool, so request handlers
/// and the store loop never write the file at the same time.
#[derive(Debug)]
pub struct SnapshotFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SnapshotFile {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        SnapshotFile {
            path,
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saves `store`, logging instead of failing.
    pub async fn save(&self, store: &Arc<MetricStore>) {
        let _guard = self.lock.lock().await;
        let store = Arc::clone(store);
        let path = self.path.clone();
        match tokio::task::spawn_blocking(move || save_to_file(&store, &path)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to save metrics to {}: {e}", self.path.display()),
            Err(e) => error!("Snapshot task failed: {e}"),
        }
    }
}

/// Seeds `store` from the snapshot at startup. A missing file is not an error.
pub fn restore_snapshot(store: &MetricStore, path: &Path) {
    match load_from_file(store, path) {
        Ok(count) => info!("Restored {count} metrics from {}", path.display()),
        Err(SnapshotError::NotFound(_)) => {
            debug!("No snapshot at {}, starting empty", path.display());
        }
        Err(e) => error!("Failed to restore metrics from {}: {e}", path.display()),
    }
}

/// Saves the snapshot every `period` until `shutdown` fires. The final save
/// on shutdown is left to the caller.
pub async fn run_store_loop(
    store: Arc<MetricStore>,
    snapshot: Arc<SnapshotFile>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!("Store loop stopped");
                return;
            }
            _ = ticker.tick() => snapshot.save(&store).await,
        }
    }
}
