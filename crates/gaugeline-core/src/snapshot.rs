// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! JSON snapshot of a [`MetricStore`] on disk.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::errors::SnapshotError;
use crate::metric::Metric;
use crate::store::MetricStore;

/// Writes every stored metric as a JSON array.
///
/// The array is written to a uniquely named temp file in the same directory,
/// which then replaces `path`. A crash mid-write leaves the previous snapshot
/// intact, and concurrent saves each install a complete file.
pub fn save_to_file(store: &MetricStore, path: &Path) -> Result<(), SnapshotError> {
    let metrics = store.get_all();
    let body = serde_json::to_vec(&metrics)?;

    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(&body)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;

    debug!("Saved {} metrics to {}", metrics.len(), path.display());
    Ok(())
}

/// Seeds `store` from a snapshot: gauges are set, counters are added.
///
/// Entries with an unknown type or without their payload field are skipped.
/// Returns the number of entries applied.
pub fn load_from_file(store: &MetricStore, path: &Path) -> Result<usize, SnapshotError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(SnapshotError::NotFound(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let metrics: Vec<Metric> = serde_json::from_slice(&data)?;

    let mut applied = 0;
    for metric in &metrics {
        match metric.to_update() {
            Ok(update) => {
                store.apply(&update);
                applied += 1;
            }
            Err(e) => warn!("Skipping snapshot entry {}: {e}", metric.id),
        }
    }
    debug!("Restored {applied} metrics from {}", path.display());
    Ok(applied)
}
