// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent lifecycle: samplers feed the store, the report timer snapshots it
//! into batches for the dispatcher.
//!
//! Shutdown runs in a fixed order: stop the samplers, submit one final batch,
//! close the dispatch queue and wait for in-flight sends, then close the
//! sender.

use std::sync::Arc;
use std::time::Duration;

use gaugeline_core::store::MetricStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::collector::{spawn_sampler, Collector, RuntimeCollector, SystemCollector};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::transport::MetricsSender;

type Sampler = Box<dyn FnOnce(Arc<MetricStore>, CancellationToken) -> JoinHandle<()> + Send>;

pub struct Agent {
    store: Arc<MetricStore>,
    sender: Arc<dyn MetricsSender>,
    samplers: Vec<Sampler>,
    report_interval: Duration,
    rate_limit: usize,
}

impl Agent {
    /// An agent sampling runtime and system metrics every `poll_interval`.
    pub fn new(config: &Config, sender: Arc<dyn MetricsSender>) -> Self {
        Agent::empty(config, sender)
            .with_collector(RuntimeCollector::new(), config.poll_interval)
            .with_collector(SystemCollector::new(), config.poll_interval)
    }

    /// An agent with no collectors attached yet.
    pub fn empty(config: &Config, sender: Arc<dyn MetricsSender>) -> Self {
        Agent {
            store: Arc::new(MetricStore::new()),
            sender,
            samplers: Vec::new(),
            report_interval: config.report_interval,
            rate_limit: config.rate_limit,
        }
    }

    #[must_use]
    pub fn with_collector<C: Collector>(mut self, collector: C, interval: Duration) -> Self {
        self.samplers.push(Box::new(move |store, cancel| {
            spawn_sampler(collector, store, interval, cancel)
        }));
        self
    }

    #[must_use]
    pub fn store(&self) -> Arc<MetricStore> {
        Arc::clone(&self.store)
    }

    /// Runs until `shutdown` is cancelled, then shuts down gracefully.
    pub async fn run(self, shutdown: CancellationToken) {
        let Agent {
            store,
            sender,
            samplers,
            report_interval,
            rate_limit,
        } = self;

        let sampling = CancellationToken::new();
        let sampler_handles: Vec<_> = samplers
            .into_iter()
            .map(|start| start(Arc::clone(&store), sampling.child_token()))
            .collect();

        let dispatcher = Dispatcher::start(rate_limit, Arc::clone(&sender));
        info!(
            "Agent started with {} workers, reporting every {report_interval:?}",
            dispatcher.workers()
        );

        let mut report = tokio::time::interval(report_interval);
        report.tick().await;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = report.tick() => {
                    let batch = store.get_all();
                    if batch.is_empty() {
                        continue;
                    }
                    debug!("Submitting batch of {} metrics", batch.len());
                    if let Err(e) = dispatcher.submit(batch).await {
                        error!("Failed to submit batch: {e}");
                    }
                }
            }
        }

        info!("Starting graceful shutdown");
        sampling.cancel();
        for handle in sampler_handles {
            if let Err(e) = handle.await {
                error!("Sampler task failed: {e}");
            }
        }

        let final_batch = store.get_all();
        if !final_batch.is_empty() {
            info!("Sending final batch of {} metrics", final_batch.len());
            if let Err(e) = dispatcher.submit(final_batch).await {
                error!("Failed to submit final batch: {e}");
            }
        }

        info!("Waiting for pending requests to complete");
        dispatcher.shutdown().await;
        sender.close().await;
        info!("Agent shutdown complete");
    }
}
