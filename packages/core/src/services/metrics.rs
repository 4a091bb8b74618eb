//! Pipeline observability counters
//!
//! Non-fatal conditions (stale writes, budget overruns, degenerate
//! projections) never surface as errors; they are counted here and logged.
//!
//! # Usage
//!
//! ```rust
//! use notesphere_core::services::PipelineMetrics;
//! use std::time::Duration;
//!
//! let metrics = PipelineMetrics::new();
//! metrics.record_published(Duration::from_millis(12), false);
//! metrics.record_published(Duration::from_millis(250), true);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.published, 2);
//! assert_eq!(snapshot.budget_exceeded, 1);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Number of most recent latencies kept for percentile estimates
const LATENCY_WINDOW: usize = 1024;

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    published: AtomicU64,
    superseded: AtomicU64,
    unchanged: AtomicU64,
    stale_writes: AtomicU64,
    budget_exceeded: AtomicU64,
    degenerate: AtomicU64,
    rebuilds: AtomicU64,
    store_failures: AtomicU64,
    latencies: Mutex<VecDeque<Duration>>,
}

/// Point-in-time copy of [`PipelineMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub published: u64,
    pub superseded: u64,
    pub unchanged: u64,
    pub stale_writes: u64,
    pub budget_exceeded: u64,
    pub degenerate: u64,
    pub rebuilds: u64,
    pub store_failures: u64,
    /// Latency percentiles in milliseconds over the recent window
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub latency_samples: usize,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A change reached `Published`
    pub fn record_published(&self, latency: Duration, over_budget: bool) {
        self.published.fetch_add(1, Ordering::Relaxed);
        if over_budget {
            self.budget_exceeded.fetch_add(1, Ordering::Relaxed);
        }
        let mut window = self.latencies.lock().unwrap_or_else(|p| p.into_inner());
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency);
    }

    pub fn record_superseded(&self) {
        self.superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unchanged(&self) {
        self.unchanged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_write(&self) {
        self.stale_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degenerate(&self) {
        self.degenerate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rebuild(&self) {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut sorted: Vec<Duration> = {
            let window = self.latencies.lock().unwrap_or_else(|p| p.into_inner());
            window.iter().copied().collect()
        };
        sorted.sort();

        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            stale_writes: self.stale_writes.load(Ordering::Relaxed),
            budget_exceeded: self.budget_exceeded.load(Ordering::Relaxed),
            degenerate: self.degenerate.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            latency_p50_ms: millis(percentile(&sorted, 50.0)),
            latency_p95_ms: millis(percentile(&sorted, 95.0)),
            latency_p99_ms: millis(percentile(&sorted, 99.0)),
            latency_samples: sorted.len(),
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Nearest-rank percentile of an ascending slice
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let snapshot = PipelineMetrics::new().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
    }

    #[test]
    fn test_percentiles() {
        let metrics = PipelineMetrics::new();
        for ms in 1..=100 {
            metrics.record_published(Duration::from_millis(ms), false);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.latency_samples, 100);
        assert!((snapshot.latency_p50_ms - 50.0).abs() < 1e-9);
        assert!((snapshot.latency_p95_ms - 95.0).abs() < 1e-9);
        assert!((snapshot.latency_p99_ms - 99.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_is_bounded() {
        let metrics = PipelineMetrics::new();
        for _ in 0..(LATENCY_WINDOW + 10) {
            metrics.record_published(Duration::from_millis(1), false);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.latency_samples, LATENCY_WINDOW);
        assert_eq!(snapshot.published, (LATENCY_WINDOW + 10) as u64);
    }

    #[test]
    fn test_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_superseded();
        metrics.record_superseded();
        metrics.record_unchanged();
        metrics.record_stale_write();
        metrics.record_degenerate();
        metrics.record_rebuild();
        metrics.record_store_failure();
        metrics.record_published(Duration::from_millis(300), true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.superseded, 2);
        assert_eq!(snapshot.unchanged, 1);
        assert_eq!(snapshot.stale_writes, 1);
        assert_eq!(snapshot.degenerate, 1);
        assert_eq!(snapshot.rebuilds, 1);
        assert_eq!(snapshot.store_failures, 1);
        assert_eq!(snapshot.budget_exceeded, 1);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let json = serde_json::to_value(PipelineMetrics::new().snapshot()).unwrap();
        assert!(json.get("budgetExceeded").is_some());
        assert!(json.get("latencyP95Ms").is_some());
    }
}
