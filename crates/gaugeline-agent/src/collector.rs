// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic samplers writing into the agent's [`MetricStore`].
//!
//! A sampler never fails as a whole: when a reading is unavailable its key
//! is simply left out of that pass.

use std::sync::Arc;
use std::time::Duration;

use gaugeline_core::store::MetricStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

pub trait Collector: Send + 'static {
    fn name(&self) -> &'static str;

    fn collect(&mut self, store: &MetricStore);
}

/// Metrics about the agent process itself, plus the poll counter and a
/// random gauge that makes stale or duplicated deliveries visible.
pub struct RuntimeCollector {
    system: System,
    pid: Option<Pid>,
    rng: StdRng,
}

impl RuntimeCollector {
    #[must_use]
    pub fn new() -> Self {
        RuntimeCollector {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for RuntimeCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for RuntimeCollector {
    fn name(&self) -> &'static str {
        "runtime"
    }

    #[allow(clippy::cast_precision_loss)]
    fn collect(&mut self, store: &MetricStore) {
        if let Some(pid) = self.pid {
            if self.system.refresh_processes(ProcessesToUpdate::Some(&[pid])) > 0 {
                if let Some(process) = self.system.process(pid) {
                    store.set_gauge("ProcessResidentMemory", process.memory() as f64);
                    store.set_gauge("ProcessVirtualMemory", process.virtual_memory() as f64);
                    store.set_gauge("ProcessCPUUsage", f64::from(process.cpu_usage()));
                    store.set_gauge("ProcessRunTime", process.run_time() as f64);
                }
            }
        }
        store.add_counter(POLL_COUNT, 1);
        store.set_gauge(RANDOM_VALUE, self.rng.gen::<f64>() * 100.0);
    }
}

/// Host-wide memory and per-CPU utilization.
pub struct SystemCollector {
    system: System,
}

impl SystemCollector {
    #[must_use]
    pub fn new() -> Self {
        let mut system = System::new();
        // Utilization is computed between two refreshes; prime the first one.
        system.refresh_cpu_all();
        SystemCollector { system }
    }
}

impl Default for SystemCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for SystemCollector {
    fn name(&self) -> &'static str {
        "system"
    }

    #[allow(clippy::cast_precision_loss)]
    fn collect(&mut self, store: &MetricStore) {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total > 0 {
            store.set_gauge("TotalMemory", total as f64);
            store.set_gauge("FreeMemory", self.system.free_memory() as f64);
        }

        self.system.refresh_cpu_all();
        for (i, cpu) in self.system.cpus().iter().enumerate() {
            store.set_gauge(
                &format!("CPUutilization{}", i + 1),
                f64::from(cpu.cpu_usage()),
            );
        }
    }
}

/// Runs `collector` every `interval` until `cancel` fires.
///
/// The first sample is taken one full interval after start.
pub fn spawn_sampler<C: Collector>(
    mut collector: C,
    store: Arc<MetricStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Sampler {} stopped", collector.name());
                    return;
                }
                _ = ticker.tick() => collector.collect(&store),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_collector_counts_polls_and_draws_random_value() {
        let store = MetricStore::new();
        let mut collector = RuntimeCollector::new();
        collector.collect(&store);
        collector.collect(&store);
        collector.collect(&store);

        assert_eq!(store.get_counter(POLL_COUNT), Some(3));
        let random = store.get_gauge(RANDOM_VALUE).unwrap();
        assert!((0.0..100.0).contains(&random));
    }

    #[test]
    fn system_collector_reports_memory_and_numbered_cpus() {
        let store = MetricStore::new();
        let mut collector = SystemCollector::new();
        collector.collect(&store);

        if let Some(total) = store.get_gauge("TotalMemory") {
            assert!(total > 0.0);
            assert!(store.get_gauge("FreeMemory").is_some());
        }
        let cpus = collector.system.cpus().len();
        if cpus > 0 {
            assert!(store.get_gauge("CPUutilization1").is_some());
            assert!(store.get_gauge(&format!("CPUutilization{}", cpus + 1)).is_none());
        }
        assert!(store.get_counter(POLL_COUNT).is_none());
    }

    struct Counting;

    impl Collector for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn collect(&mut self, store: &MetricStore) {
            store.add_counter("ticks", 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_ticks_until_cancelled() {
        let store = Arc::new(MetricStore::new());
        let cancel = CancellationToken::new();
        let handle = spawn_sampler(
            Counting,
            Arc::clone(&store),
            Duration::from_secs(2),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(6500)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(store.get_counter("ticks"), Some(3));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.get_counter("ticks"), Some(3));
    }
}
