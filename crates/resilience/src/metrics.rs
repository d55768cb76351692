//! Execution metrics shared by all resilience policies.
//!
//! Counters are monotonic atomics safe for concurrent increments. The
//! rolling average is guarded by a mutex so each sample applies the update
//! `avg = (avg * (n - 1) + sample) / n` against a consistent sample count.
//! Snapshots capture all raw counters first and compute derived ratios from
//! that capture, never from live counters.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::policy::ResiliencePattern;

/// Counter set every policy maintains.
#[derive(Debug, Default)]
pub struct PolicyMetrics {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    timeout: AtomicU64,
    retried: AtomicU64,
    fallback: AtomicU64,
    fallback_failed: AtomicU64,
    compensation: AtomicU64,
    compensation_failed: AtomicU64,
    avg: Mutex<RollingAverage>,
}

#[derive(Debug, Default)]
struct RollingAverage {
    samples: u64,
    avg_ms: f64,
}

impl RollingAverage {
    fn update(&mut self, elapsed: Duration) {
        self.samples += 1;
        let n = self.samples as f64;
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.avg_ms = (self.avg_ms * (n - 1.0) + sample) / n;
    }
}

impl PolicyMetrics {
    /// Create a zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful execution.
    pub fn record_success(&self, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.successful.fetch_add(1, Ordering::Relaxed);
        self.avg.lock().update(elapsed);
    }

    /// Record a failed execution.
    pub fn record_failure(&self, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.avg.lock().update(elapsed);
    }

    /// Record a timed-out execution. Timeouts count as failures too.
    pub fn record_timeout(&self, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.timeout.fetch_add(1, Ordering::Relaxed);
        self.avg.lock().update(elapsed);
    }

    /// Record an admission rejection. Rejections are not failures.
    pub fn record_rejection(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark that an execution needed at least one retry.
    pub fn mark_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fallback invocation.
    pub fn record_fallback(&self, succeeded: bool) {
        self.fallback.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.fallback_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a compensation invocation.
    pub fn record_compensation(&self, succeeded: bool) {
        self.compensation.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.compensation_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Total executions observed so far.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Zero every counter and the rolling average.
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.successful.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.timeout.store(0, Ordering::Relaxed);
        self.retried.store(0, Ordering::Relaxed);
        self.fallback.store(0, Ordering::Relaxed);
        self.fallback_failed.store(0, Ordering::Relaxed);
        self.compensation.store(0, Ordering::Relaxed);
        self.compensation_failed.store(0, Ordering::Relaxed);
        *self.avg.lock() = RollingAverage::default();
    }

    /// Capture a consistent snapshot.
    ///
    /// Raw counters are read first; `failure_rate`/`success_rate` are
    /// derived from the captured values.
    #[must_use]
    pub fn snapshot(
        &self,
        name: impl Into<String>,
        pattern: ResiliencePattern,
    ) -> PolicyMetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let rejected = self.rejected.load(Ordering::Relaxed);
        let timeout = self.timeout.load(Ordering::Relaxed);
        let retried = self.retried.load(Ordering::Relaxed);
        let fallback = self.fallback.load(Ordering::Relaxed);
        let fallback_failed = self.fallback_failed.load(Ordering::Relaxed);
        let compensation = self.compensation.load(Ordering::Relaxed);
        let compensation_failed = self.compensation_failed.load(Ordering::Relaxed);
        let avg_execution_ms = self.avg.lock().avg_ms;

        let (failure_rate, success_rate) = if total == 0 {
            (0.0, 0.0)
        } else {
            (failed as f64 / total as f64, successful as f64 / total as f64)
        };

        PolicyMetricsSnapshot {
            name: name.into(),
            pattern,
            total,
            successful,
            failed,
            rejected,
            timeout,
            retried,
            fallback,
            fallback_failed,
            compensation,
            compensation_failed,
            avg_execution_ms,
            failure_rate,
            success_rate,
            extra: serde_json::Map::new(),
        }
    }
}

/// Point-in-time view of a policy's metrics.
///
/// Field names are stable; pattern-specific additions flatten into the same
/// object under their own names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyMetricsSnapshot {
    /// Policy name.
    pub name: String,
    /// Which resilience pattern produced this snapshot.
    pub pattern: ResiliencePattern,
    /// Total executions.
    pub total: u64,
    /// Successful executions.
    pub successful: u64,
    /// Failed executions (timeouts included).
    pub failed: u64,
    /// Admission rejections.
    pub rejected: u64,
    /// Timed-out executions.
    pub timeout: u64,
    /// Executions that needed at least one retry.
    pub retried: u64,
    /// Fallback invocations.
    pub fallback: u64,
    /// Failed fallback invocations.
    pub fallback_failed: u64,
    /// Compensation invocations.
    pub compensation: u64,
    /// Failed compensation invocations.
    pub compensation_failed: u64,
    /// Rolling average execution time in milliseconds.
    pub avg_execution_ms: f64,
    /// `failed / total` from the same capture.
    pub failure_rate: f64,
    /// `successful / total` from the same capture.
    pub success_rate: f64,
    /// Pattern-specific additions.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PolicyMetricsSnapshot {
    /// Attach a pattern-specific field.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rolling_average_matches_arithmetic_mean() {
        let metrics = PolicyMetrics::new();
        metrics.record_success(Duration::from_millis(10));
        metrics.record_success(Duration::from_millis(20));
        metrics.record_failure(Duration::from_millis(30));

        let snap = metrics.snapshot("m", ResiliencePattern::Retry);
        assert!((snap.avg_execution_ms - 20.0).abs() < 1e-6);
        assert_eq!(snap.total, 3);
        assert_eq!(snap.successful, 2);
        assert_eq!(snap.failed, 1);
    }

    #[test]
    fn rejection_counts_as_rejected_not_failed() {
        let metrics = PolicyMetrics::new();
        metrics.record_rejection();

        let snap = metrics.snapshot("m", ResiliencePattern::Bulkhead);
        assert_eq!(snap.total, 1);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.failed, 0);
        assert_eq!(snap.failure_rate, 0.0);
    }

    #[test]
    fn timeout_counts_as_failure_and_timeout() {
        let metrics = PolicyMetrics::new();
        metrics.record_timeout(Duration::from_millis(5));

        let snap = metrics.snapshot("m", ResiliencePattern::Timeout);
        assert_eq!(snap.timeout, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.failure_rate, 1.0);
    }

    #[test]
    fn reset_zeros_everything() {
        let metrics = PolicyMetrics::new();
        metrics.record_success(Duration::from_millis(10));
        metrics.mark_retried();
        metrics.reset();

        let snap = metrics.snapshot("m", ResiliencePattern::Retry);
        assert_eq!(snap.total, 0);
        assert_eq!(snap.retried, 0);
        assert_eq!(snap.avg_execution_ms, 0.0);
    }

    #[test]
    fn snapshot_serializes_with_flattened_extras() {
        let metrics = PolicyMetrics::new();
        let snap = metrics
            .snapshot("cb", ResiliencePattern::CircuitBreaker)
            .with_extra("state", "closed");
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["name"], "cb");
        assert_eq!(json["state"], "closed");
    }
}
