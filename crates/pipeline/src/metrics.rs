//! Metrics collection for pipeline and stage execution.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Collector of named execution metrics.
///
/// Counters tolerate concurrent increments; the rolling average applies
/// `avg = (avg * (n - 1) + sample) / n` under the write lock so `n` is the
/// post-increment total for that sample.
#[derive(Debug)]
pub struct MetricsTracker {
    enabled: bool,
    metrics: RwLock<HashMap<String, Metric>>,
}

#[derive(Debug, Default, Clone)]
struct Metric {
    total: u64,
    successful: u64,
    failed: u64,
    avg_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

impl Metric {
    fn record(&mut self, elapsed: Duration, success: bool) {
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.total += 1;
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        let n = self.total as f64;
        self.avg_ms = (self.avg_ms * (n - 1.0) + sample) / n;
        if self.total == 1 {
            self.min_ms = sample;
            self.max_ms = sample;
        } else {
            self.min_ms = self.min_ms.min(sample);
            self.max_ms = self.max_ms.max(sample);
        }
    }

    fn snapshot(&self) -> MetricSnapshot {
        // Capture raw counters first; derive ratios from the capture.
        let (total, successful, failed) = (self.total, self.successful, self.failed);
        MetricSnapshot {
            total,
            successful,
            failed,
            avg_execution_ms: self.avg_ms,
            min_execution_ms: self.min_ms,
            max_execution_ms: self.max_ms,
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64
            },
        }
    }
}

impl MetricsTracker {
    /// Create a tracker. A disabled tracker drops every sample.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            metrics: RwLock::new(HashMap::new()),
        }
    }

    /// Record one execution sample under `name`.
    pub fn record(&self, name: impl Into<String>, elapsed: Duration, success: bool) {
        if !self.enabled {
            return;
        }
        self.metrics
            .write()
            .entry(name.into())
            .or_default()
            .record(elapsed, success);
    }

    /// Snapshot one metric.
    #[must_use]
    pub fn snapshot(&self, name: &str) -> Option<MetricSnapshot> {
        self.metrics.read().get(name).map(Metric::snapshot)
    }

    /// Snapshot every metric.
    #[must_use]
    pub fn all_metrics(&self) -> HashMap<String, MetricSnapshot> {
        self.metrics
            .read()
            .iter()
            .map(|(name, metric)| (name.clone(), metric.snapshot()))
            .collect()
    }

    /// Drop every metric.
    pub fn clear(&self) {
        self.metrics.write().clear();
    }
}

/// Point-in-time view of one metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Total executions.
    pub total: u64,
    /// Successful executions.
    pub successful: u64,
    /// Failed executions.
    pub failed: u64,
    /// Rolling average execution time in milliseconds.
    pub avg_execution_ms: f64,
    /// Fastest execution in milliseconds.
    pub min_execution_ms: f64,
    /// Slowest execution in milliseconds.
    pub max_execution_ms: f64,
    /// `successful / total` from the same capture.
    pub success_rate: f64,
}
