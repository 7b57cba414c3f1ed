//! Run metrics
//!
//! An explicitly passed metrics handle instead of a process-wide singleton:
//! the engine receives one at construction and threads it through to every
//! composer and unit call, so traces stay composable and tests never need
//! global reset logic.

use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

const HISTOGRAM_MAX_SAMPLES: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct HistogramStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

#[derive(Debug)]
struct MetricsInner {
    counters: RwLock<HashMap<String, u64>>,
    histograms: RwLock<HashMap<String, Vec<f64>>>,
    started_at: Instant,
}

/// Cheaply cloneable metrics handle.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                counters: RwLock::new(HashMap::new()),
                histograms: RwLock::new(HashMap::new()),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, value: u64) {
        let mut counters = self
            .inner
            .counters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *counters.entry(name.to_string()).or_insert(0) += value;
    }

    /// Record a latency sample, keeping only the most recent window.
    pub fn observe_ms(&self, name: &str, value_ms: f64) {
        let mut histograms = self
            .inner
            .histograms
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let samples = histograms.entry(name.to_string()).or_default();
        samples.push(value_ms);
        if samples.len() > HISTOGRAM_MAX_SAMPLES {
            let overflow = samples.len() - HISTOGRAM_MAX_SAMPLES;
            samples.drain(..overflow);
        }
    }

    pub fn counter(&self, name: &str) -> u64 {
        let counters = self
            .inner
            .counters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counters.get(name).copied().unwrap_or(0)
    }

    pub fn histogram_stats(&self, name: &str) -> Option<HistogramStats> {
        let histograms = self
            .inner
            .histograms
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let samples = histograms.get(name)?;
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = sorted.len();
        let percentile = |p: f64| sorted[((count as f64 * p) as usize).min(count - 1)];

        Some(HistogramStats {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            avg: sorted.iter().sum::<f64>() / count as f64,
            p50: percentile(0.50),
            p90: percentile(0.90),
            p99: percentile(0.99),
        })
    }

    /// Full snapshot for the metrics endpoint.
    pub fn snapshot(&self) -> serde_json::Value {
        let counters = self
            .inner
            .counters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let histogram_names: Vec<String> = {
            let histograms = self
                .inner
                .histograms
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            histograms.keys().cloned().collect()
        };

        let mut histograms = serde_json::Map::new();
        for name in histogram_names {
            if let Some(stats) = self.histogram_stats(&name) {
                if let Ok(value) = serde_json::to_value(&stats) {
                    histograms.insert(name, value);
                }
            }
        }

        json!({
            "uptime_seconds": self.inner.started_at.elapsed().as_secs_f64(),
            "counters": counters,
            "histograms": histograms,
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.increment("tool.calls");
        metrics.increment("tool.calls");
        metrics.add("tool.calls", 3);

        assert_eq!(metrics.counter("tool.calls"), 5);
        assert_eq!(metrics.counter("unknown"), 0);
    }

    #[test]
    fn test_histogram_stats() {
        let metrics = Metrics::new();
        for i in 1..=100 {
            metrics.observe_ms("unit.latency_ms", i as f64);
        }

        let stats = metrics.histogram_stats("unit.latency_ms").unwrap();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 100.0);
        assert!(stats.p50 >= 50.0 && stats.p50 <= 51.0);
    }

    #[test]
    fn test_handles_are_shared() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.increment("requests");

        assert_eq!(metrics.counter("requests"), 1);
    }
}
