// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded worker pool between the report timer and the network.
//!
//! Exactly `rate_limit` workers share one job queue. Handing a batch over is
//! a rendezvous: [`Dispatcher::submit`] returns only once a worker has taken
//! the batch, so while every worker is busy sending, the producer waits
//! instead of piling batches up in memory.

use std::sync::Arc;

use gaugeline_core::metric::Metric;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::transport::MetricsSender;

#[derive(Debug)]
struct Job {
    batch: Vec<Metric>,
    accepted: oneshot::Sender<()>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatcher is shut down")]
    Closed,
}

pub struct Dispatcher {
    jobs: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawns `rate_limit` workers (at least one) sending through `sender`.
    pub fn start(rate_limit: usize, sender: Arc<dyn MetricsSender>) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(1);
        let rx = Arc::new(Mutex::new(rx));
        let workers = (1..=rate_limit.max(1))
            .map(|id| {
                let rx = Arc::clone(&rx);
                let sender = Arc::clone(&sender);
                tokio::spawn(worker(id, rx, sender))
            })
            .collect();
        Dispatcher {
            jobs: Some(tx),
            workers,
        }
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Hands `batch` to a worker, waiting for one to become free.
    pub async fn submit(&self, batch: Vec<Metric>) -> Result<(), DispatchError> {
        let jobs = self.jobs.as_ref().ok_or(DispatchError::Closed)?;
        let (accepted, taken) = oneshot::channel();
        jobs.send(Job { batch, accepted })
            .await
            .map_err(|_| DispatchError::Closed)?;
        taken.await.map_err(|_| DispatchError::Closed)
    }

    /// Closes the queue and waits for every worker to finish its in-flight
    /// send and exit.
    pub async fn shutdown(mut self) {
        drop(self.jobs.take());
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                error!("Dispatch worker failed: {e}");
            }
        }
        debug!("All dispatch workers stopped");
    }
}

async fn worker(id: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>, sender: Arc<dyn MetricsSender>) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(Job { batch, accepted }) = job else {
            debug!("Worker {id}: queue closed");
            return;
        };
        // The producer may have given up waiting; the batch is still sent.
        let _ = accepted.send(());
        if let Err(e) = sender.send_batch(&batch).await {
            error!("Worker {id}: send error: {e}");
        }
    }
}
