// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory metric store shared by samplers, dispatch workers and request
//! handlers.
//!
//! Gauges and counters live in two independent namespaces, so the same name
//! may hold both a gauge and a counter. A single reader/writer lock guards
//! both maps: lookups and snapshots take the read side, mutations the write
//! side.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::metric::{format_gauge, Metric, MetricUpdate};

#[derive(Debug, Default)]
struct Inner {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

#[derive(Debug, Default)]
pub struct MetricStore {
    inner: RwLock<Inner>,
}

impl MetricStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the gauge value for `name`.
    pub fn set_gauge(&self, name: &str, value: f64) {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.gauges.insert(name.to_string(), value);
    }

    /// Adds `delta` to the counter for `name`, starting from zero.
    pub fn add_counter(&self, name: &str, delta: i64) {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.write().expect("lock poisoned");
        let counter = inner.counters.entry(name.to_string()).or_insert(0);
        *counter = counter.wrapping_add(delta);
    }

    pub fn apply(&self, update: &MetricUpdate) {
        match update {
            MetricUpdate::Gauge { name, value } => self.set_gauge(name, *value),
            MetricUpdate::Counter { name, delta } => self.add_counter(name, *delta),
        }
    }

    #[must_use]
    pub fn get_gauge(&self, name: &str) -> Option<f64> {
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock poisoned");
        inner.gauges.get(name).copied()
    }

    #[must_use]
    pub fn get_counter(&self, name: &str) -> Option<i64> {
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock poisoned");
        inner.counters.get(name).copied()
    }

    /// Point-in-time copy of every stored metric in wire form: gauges first,
    /// then counters.
    #[must_use]
    pub fn get_all(&self) -> Vec<Metric> {
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock poisoned");
        let mut all = Vec::with_capacity(inner.gauges.len() + inner.counters.len());
        all.extend(
            inner
                .gauges
                .iter()
                .map(|(name, value)| Metric::gauge(name.clone(), *value)),
        );
        all.extend(
            inner
                .counters
                .iter()
                .map(|(name, delta)| Metric::counter(name.clone(), *delta)),
        );
        all
    }

    /// Name-sorted `(name, rendered value)` rows.
    #[must_use]
    pub fn list(&self) -> Vec<(String, String)> {
        let mut rows: Vec<(String, String)> = {
            #[allow(clippy::expect_used)]
            let inner = self.inner.read().expect("lock poisoned");
            inner
                .gauges
                .iter()
                .map(|(name, value)| (name.clone(), format_gauge(*value)))
                .chain(
                    inner
                        .counters
                        .iter()
                        .map(|(name, delta)| (name.clone(), delta.to_string())),
                )
                .collect()
        };
        rows.sort();
        rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock poisoned");
        inner.gauges.len() + inner.counters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn gauge_last_write_wins() {
        let store = MetricStore::new();
        store.set_gauge("temp", 1.0);
        store.set_gauge("temp", 2.5);
        assert_eq!(store.get_gauge("temp"), Some(2.5));
    }

    #[test]
    fn counter_accumulates_from_zero() {
        let store = MetricStore::new();
        assert_eq!(store.get_counter("hits"), None);
        store.add_counter("hits", 5);
        store.add_counter("hits", -2);
        assert_eq!(store.get_counter("hits"), Some(3));
    }

    #[test]
    fn namespaces_are_independent() {
        let store = MetricStore::new();
        store.set_gauge("x", 1.5);
        store.add_counter("x", 4);
        assert_eq!(store.get_gauge("x"), Some(1.5));
        assert_eq!(store.get_counter("x"), Some(4));
        assert_eq!(store.len(), 2);

        let all = store.get_all();
        assert!(all.contains(&Metric::gauge("x", 1.5)));
        assert!(all.contains(&Metric::counter("x", 4)));
    }

    #[test]
    fn list_is_sorted_and_rendered() {
        let store = MetricStore::new();
        store.set_gauge("b", 0.25);
        store.add_counter("a", 10);
        store.set_gauge("c", 3.0);
        assert_eq!(
            store.list(),
            vec![
                ("a".to_string(), "10".to_string()),
                ("b".to_string(), "0.25".to_string()),
                ("c".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn concurrent_counter_updates_are_not_lost() {
        let store = Arc::new(MetricStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        store.add_counter("hits", 1);
                        let _ = store.get_all();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get_counter("hits"), Some(8000));
    }

    proptest! {
        #[test]
        fn counter_sum_matches_deltas(d1 in -1_000_000i64..1_000_000, d2 in -1_000_000i64..1_000_000) {
            let store = MetricStore::new();
            store.add_counter("c", d1);
            store.add_counter("c", d2);
            prop_assert_eq!(store.get_counter("c"), Some(d1 + d2));
        }

        #[test]
        fn gauge_keeps_last_value(v1 in proptest::num::f64::NORMAL, v2 in proptest::num::f64::NORMAL) {
            let store = MetricStore::new();
            store.set_gauge("g", v1);
            store.set_gauge("g", v2);
            prop_assert_eq!(store.get_gauge("g"), Some(v2));
        }
    }
}
