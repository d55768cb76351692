//! Timeout policy for async operations.
//!
//! Two strategies:
//!
//! - **Optimistic**: the operation's future is raced against the deadline in
//!   the current task and dropped when the deadline wins. Dropping the
//!   future is cooperative cancellation; the operation stops at its next
//!   await point.
//! - **Pessimistic**: the operation is spawned onto the runtime and
//!   abandoned when the deadline wins. The spawned task may keep running,
//!   but its result is discarded and never surfaced.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::{ConfigError, ConfigResult, PolicyConfig};
use crate::error::{ResilienceError, ResilienceResult};
use crate::metrics::{PolicyMetrics, PolicyMetricsSnapshot};
use crate::policy::ResiliencePattern;

/// How the deadline is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutStrategy {
    /// Race in-task; the operation is dropped at the deadline.
    Optimistic,
    /// Spawn and abandon; a late result is discarded.
    Pessimistic,
}

/// Timeout policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Maximum time the operation may take.
    pub duration: Duration,
    /// Enforcement strategy.
    pub strategy: TimeoutStrategy,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
            strategy: TimeoutStrategy::Optimistic,
        }
    }
}

impl PolicyConfig for TimeoutConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.duration.is_zero() {
            return Err(ConfigError::validation("duration must be greater than 0"));
        }
        Ok(())
    }
}

/// Timeout policy.
pub struct TimeoutPolicy {
    name: String,
    config: TimeoutConfig,
    enabled: bool,
    metrics: PolicyMetrics,
}

impl TimeoutPolicy {
    /// Create an optimistic policy with the given deadline.
    #[must_use]
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self::with_config(
            name,
            TimeoutConfig {
                duration,
                ..TimeoutConfig::default()
            },
        )
    }

    /// Create a policy with a custom configuration.
    #[must_use]
    pub fn with_config(name: impl Into<String>, config: TimeoutConfig) -> Self {
        Self {
            name: name.into(),
            config,
            enabled: true,
            metrics: PolicyMetrics::new(),
        }
    }

    /// Disable the policy; a disabled policy imposes no deadline.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Policy name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the deadline is enforced.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Execute an operation under the deadline.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> ResilienceResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = ResilienceResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let started = Instant::now();
        if !self.enabled {
            let result = operation().await;
            match &result {
                Ok(_) => self.metrics.record_success(started.elapsed()),
                Err(_) => self.metrics.record_failure(started.elapsed()),
            }
            return result;
        }

        let result = match self.config.strategy {
            TimeoutStrategy::Optimistic => {
                match tokio::time::timeout(self.config.duration, operation()).await {
                    Ok(inner) => inner,
                    Err(_elapsed) => Err(ResilienceError::timeout(self.config.duration)),
                }
            }
            TimeoutStrategy::Pessimistic => {
                let handle = tokio::spawn(operation());
                match tokio::time::timeout(self.config.duration, handle).await {
                    Ok(Ok(inner)) => inner,
                    Ok(Err(join_error)) => Err(ResilienceError::application_with_source(
                        "timed-out operation panicked or was aborted",
                        false,
                        join_error,
                    )),
                    // Deadline won: abandon the task, discard its result.
                    Err(_elapsed) => {
                        debug!(
                            policy = %self.name,
                            duration_ms = self.config.duration.as_millis() as u64,
                            "abandoning operation past deadline"
                        );
                        Err(ResilienceError::timeout(self.config.duration))
                    }
                }
            }
        };

        match &result {
            Ok(_) => self.metrics.record_success(started.elapsed()),
            Err(ResilienceError::Timeout { .. }) => self.metrics.record_timeout(started.elapsed()),
            Err(_) => self.metrics.record_failure(started.elapsed()),
        }
        result
    }

    /// Metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> PolicyMetricsSnapshot {
        self.metrics
            .snapshot(&self.name, ResiliencePattern::Timeout)
            .with_extra("duration_ms", self.config.duration.as_millis() as u64)
    }

    /// Zero the metrics.
    pub fn reset_all(&self) {
        self.metrics.reset();
    }
}

/// Race `future` against `duration`, dropping it when the deadline wins.
pub async fn timeout<T, F>(duration: Duration, future: F) -> ResilienceResult<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| ResilienceError::timeout(duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let policy = TimeoutPolicy::new("t", Duration::from_millis(100));
        let result = policy.execute(|| async { Ok::<_, ResilienceError>(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_optimistic_deadline_exceeded() {
        let policy = TimeoutPolicy::new("t", Duration::from_millis(10));
        let err = policy
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, ResilienceError>(1)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::Timeout { duration } if duration == Duration::from_millis(10)));
        assert_eq!(policy.metrics().timeout, 1);
    }

    #[tokio::test]
    async fn test_pessimistic_discards_late_result() {
        let policy = TimeoutPolicy::with_config(
            "t",
            TimeoutConfig {
                duration: Duration::from_millis(20),
                strategy: TimeoutStrategy::Pessimistic,
            },
        );
        let finished = Arc::new(AtomicBool::new(false));

        let finished_in = Arc::clone(&finished);
        let err = policy
            .execute(move || {
                let finished = Arc::clone(&finished_in);
                async move {
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok::<_, ResilienceError>(1)
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::Timeout { .. }));

        // The abandoned task keeps running; its result is never surfaced.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_disabled_policy_imposes_no_deadline() {
        let policy = TimeoutPolicy::new("t", Duration::from_millis(10)).disabled();
        let result = policy
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, ResilienceError>("late but fine")
            })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_free_function_timeout() {
        let result = timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        })
        .await;
        assert!(matches!(result, Err(ResilienceError::Timeout { .. })));
    }
}
