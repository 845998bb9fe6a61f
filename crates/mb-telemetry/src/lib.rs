// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured telemetry for the markbase daemon: one-shot tracing
//! initialisation plus a thread-safe request metrics collector.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing init
// ---------------------------------------------------------------------------

/// Initialise the global tracing subscriber.
///
/// `level` seeds the [`EnvFilter`] (the `RUST_LOG` variable still wins when
/// set); `json` switches the fmt layer to JSON lines for log shippers.
/// Calling twice is a no-op rather than a panic.
pub fn init(level: Option<&str>, json: bool) {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(env) => EnvFilter::new(env),
        Err(_) => EnvFilter::new(level.unwrap_or("info")),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    // A second init (tests) keeps the first subscriber.
    let _ = result;
}

// ---------------------------------------------------------------------------
// Request metrics
// ---------------------------------------------------------------------------

/// Aggregated request statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSummary {
    /// Requests recorded.
    pub count: usize,
    /// Mean latency in milliseconds.
    pub mean_ms: f64,
    /// Median latency in milliseconds.
    pub p50_ms: f64,
    /// 99th-percentile latency in milliseconds.
    pub p99_ms: f64,
    /// Non-2xx responses.
    pub error_count: usize,
}

/// Compute a percentile value from a **sorted** slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

/// Thread-safe collector for request latencies and outcomes.
///
/// Clone freely; the inner storage is shared behind a `Mutex`.
#[derive(Debug, Clone, Default)]
pub struct RequestMetrics {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    durations_ms: Vec<u64>,
    errors: usize,
}

impl RequestMetrics {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed request.
    pub fn record(&self, duration_ms: u64, status: u16) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.durations_ms.push(duration_ms);
        if !(200..300).contains(&status) {
            guard.errors += 1;
        }
    }

    /// Snapshot aggregate statistics.
    pub fn summary(&self) -> MetricsSummary {
        let guard = self.inner.lock().expect("metrics lock poisoned");
        let mut sorted = guard.durations_ms.clone();
        sorted.sort_unstable();
        let count = sorted.len();
        let mean = if count == 0 {
            0.0
        } else {
            sorted.iter().sum::<u64>() as f64 / count as f64
        };
        MetricsSummary {
            count,
            mean_ms: mean,
            p50_ms: percentile(&sorted, 50.0),
            p99_ms: percentile(&sorted, 99.0),
            error_count: guard.errors,
        }
    }

    /// Drop all recorded samples.
    pub fn clear(&self) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.durations_ms.clear();
        guard.errors = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_summary_is_zero() {
        let metrics = RequestMetrics::new();
        let summary = metrics.summary();
        assert_eq!(summary.count, 0);
        assert_eq!(summary.p99_ms, 0.0);
    }

    #[test]
    fn records_and_percentiles() {
        let metrics = RequestMetrics::new();
        for ms in [10u64, 20, 30, 40] {
            metrics.record(ms, 200);
        }
        let summary = metrics.summary();
        assert_eq!(summary.count, 4);
        assert_eq!(summary.mean_ms, 25.0);
        assert_eq!(summary.p50_ms, 25.0);
    }

    #[test]
    fn counts_errors() {
        let metrics = RequestMetrics::new();
        metrics.record(5, 200);
        metrics.record(5, 404);
        metrics.record(5, 500);
        assert_eq!(metrics.summary().error_count, 2);
    }

    #[test]
    fn clear_resets() {
        let metrics = RequestMetrics::new();
        metrics.record(5, 200);
        metrics.clear();
        assert_eq!(metrics.summary().count, 0);
    }

    #[test]
    fn percentile_single_sample() {
        assert_eq!(percentile(&[7], 99.0), 7.0);
    }
}
