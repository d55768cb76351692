//! Bulkhead pattern: bounded concurrency with a bounded wait queue.
//!
//! Up to `max_concurrent_calls` operations run at once; up to
//! `max_queued_calls` callers wait behind them. Any arrival beyond that is
//! rejected immediately, and a queued caller that outlives
//! `max_wait_duration` is rejected too.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{ConfigError, ConfigResult, PolicyConfig};
use crate::error::{ResilienceError, ResilienceResult};
use crate::metrics::{PolicyMetrics, PolicyMetricsSnapshot};
use crate::policy::ResiliencePattern;

/// Bulkhead configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkheadConfig {
    /// Maximum operations running at once.
    pub max_concurrent_calls: usize,
    /// Maximum callers allowed to wait for a slot.
    pub max_queued_calls: usize,
    /// How long a queued caller waits before rejection.
    pub max_wait_duration: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 10,
            max_queued_calls: 100,
            max_wait_duration: Duration::from_secs(30),
        }
    }
}

impl PolicyConfig for BulkheadConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent_calls == 0 {
            return Err(ConfigError::validation(
                "max_concurrent_calls must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Bulkhead implementation.
pub struct Bulkhead {
    name: String,
    config: BulkheadConfig,
    enabled: bool,
    semaphore: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    metrics: PolicyMetrics,
}

impl Bulkhead {
    /// Create a bulkhead with the given concurrency limit and defaults
    /// otherwise.
    #[must_use]
    pub fn new(name: impl Into<String>, max_concurrent_calls: usize) -> Self {
        Self::with_config(
            name,
            BulkheadConfig {
                max_concurrent_calls,
                ..BulkheadConfig::default()
            },
        )
    }

    /// Create a bulkhead with a custom configuration.
    #[must_use]
    pub fn with_config(name: impl Into<String>, config: BulkheadConfig) -> Self {
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_calls)),
            queued: Arc::new(AtomicUsize::new(0)),
            enabled: true,
            config,
            metrics: PolicyMetrics::new(),
        }
    }

    /// Disable the bulkhead; a disabled bulkhead admits every call.
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

    /// Whether admission control is active.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Operations currently running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.config.max_concurrent_calls - self.semaphore.available_permits()
    }

    /// Callers currently waiting for a slot.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Acquire a slot, queueing when the bulkhead is saturated.
    ///
    /// Fails with [`ResilienceError::BulkheadFull`] when the queue is full
    /// or `max_wait_duration` elapses, and with
    /// [`ResilienceError::Cancelled`] when `cancel` trips while waiting.
    pub async fn acquire(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> ResilienceResult<OwnedSemaphorePermit> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(permit);
        }

        // Saturated: claim a queue slot or reject outright.
        let waiting = self.queued.fetch_add(1, Ordering::AcqRel);
        if waiting >= self.config.max_queued_calls {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(ResilienceError::bulkhead_full(
                &self.name,
                self.config.max_concurrent_calls,
                waiting,
            ));
        }
        debug!(bulkhead = %self.name, queued = waiting + 1, "caller queued");

        let acquire = tokio::time::timeout(
            self.config.max_wait_duration,
            Arc::clone(&self.semaphore).acquire_owned(),
        );
        let outcome = match cancel {
            Some(token) => tokio::select! {
                () = token.cancelled() => {
                    self.queued.fetch_sub(1, Ordering::AcqRel);
                    return Err(ResilienceError::Cancelled);
                }
                res = acquire => res,
            },
            None => acquire.await,
        };
        self.queued.fetch_sub(1, Ordering::AcqRel);

        match outcome {
            Ok(Ok(permit)) => Ok(permit),
            // Semaphore closed: the bulkhead is being torn down.
            Ok(Err(_)) => Err(ResilienceError::Cancelled),
            Err(_elapsed) => Err(ResilienceError::bulkhead_full(
                &self.name,
                self.config.max_concurrent_calls,
                self.queued(),
            )),
        }
    }

    /// Execute an operation inside the bulkhead.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> ResilienceResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = ResilienceResult<T>> + Send,
        T: Send,
    {
        self.execute_cancellable(None, operation).await
    }

    /// Execute an operation, failing queued waits with `Cancelled` when the
    /// token trips.
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        cancel: Option<&CancellationToken>,
        operation: F,
    ) -> ResilienceResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = ResilienceResult<T>> + Send,
        T: Send,
    {
        let permit = if self.enabled {
            match self.acquire(cancel).await {
                Ok(permit) => Some(permit),
                Err(error) => {
                    if error.is_rejection() {
                        self.metrics.record_rejection();
                    }
                    return Err(error);
                }
            }
        } else {
            None
        };

        let started = Instant::now();
        let result = operation().await;
        drop(permit);

        match &result {
            Ok(_) => self.metrics.record_success(started.elapsed()),
            Err(_) => self.metrics.record_failure(started.elapsed()),
        }
        result
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> BulkheadStats {
        BulkheadStats {
            max_concurrent_calls: self.config.max_concurrent_calls,
            active: self.active(),
            queued: self.queued(),
        }
    }

    /// Metrics snapshot with bulkhead-specific additions.
    #[must_use]
    pub fn metrics(&self) -> PolicyMetricsSnapshot {
        let stats = self.stats();
        self.metrics
            .snapshot(&self.name, ResiliencePattern::Bulkhead)
            .with_extra("active", stats.active as u64)
            .with_extra("queued", stats.queued as u64)
    }

    /// Zero the metrics.
    pub fn reset_all(&self) {
        self.metrics.reset();
    }
}

/// Point-in-time bulkhead statistics.
#[derive(Debug, Clone, Copy)]
pub struct BulkheadStats {
    /// Concurrency limit.
    pub max_concurrent_calls: usize,
    /// Operations currently running.
    pub active: usize,
    /// Callers currently waiting.
    pub queued: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight(queue: usize, wait: Duration) -> Bulkhead {
        Bulkhead::with_config(
            "bh",
            BulkheadConfig {
                max_concurrent_calls: 1,
                max_queued_calls: queue,
                max_wait_duration: wait,
            },
        )
    }

    #[tokio::test]
    async fn test_execute_under_limit() {
        let bh = Bulkhead::new("bh", 2);
        let result = bh.execute(|| async { Ok::<_, ResilienceError>("ok") }).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(bh.active(), 0);
    }

    #[tokio::test]
    async fn test_arrival_beyond_queue_is_rejected_immediately() {
        let bh = Arc::new(tight(0, Duration::from_secs(5)));
        let _held = bh.acquire(None).await.unwrap();

        let err = bh
            .execute(|| async { Ok::<_, ResilienceError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::BulkheadFull { .. }));
        assert_eq!(bh.metrics().rejected, 1);
    }

    #[tokio::test]
    async fn test_queued_caller_admitted_when_slot_frees() {
        let bh = Arc::new(tight(1, Duration::from_secs(5)));
        let held = bh.acquire(None).await.unwrap();

        let bh_clone = Arc::clone(&bh);
        let waiter = tokio::spawn(async move {
            bh_clone
                .execute(|| async { Ok::<_, ResilienceError>(7) })
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bh.queued(), 1);
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_queued_caller_times_out() {
        let bh = Arc::new(tight(1, Duration::from_millis(30)));
        let _held = bh.acquire(None).await.unwrap();

        let err = bh
            .execute(|| async { Ok::<_, ResilienceError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::BulkheadFull { .. }));
    }

    #[tokio::test]
    async fn test_queued_caller_wakes_on_cancellation() {
        let bh = Arc::new(tight(1, Duration::from_secs(5)));
        let _held = bh.acquire(None).await.unwrap();
        let token = CancellationToken::new();

        let bh_clone = Arc::clone(&bh);
        let waiter_token = token.clone();
        let waiter = tokio::spawn(async move {
            bh_clone
                .execute_cancellable(Some(&waiter_token), || async {
                    Ok::<_, ResilienceError>(())
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, ResilienceError::Cancelled));
        assert_eq!(bh.queued(), 0);
    }

    #[tokio::test]
    async fn test_disabled_bulkhead_admits_everything() {
        let bh = Arc::new(tight(0, Duration::from_millis(10)).disabled());
        let results = futures::future::join_all((0..4).map(|_| {
            let bh = Arc::clone(&bh);
            async move { bh.execute(|| async { Ok::<_, ResilienceError>(()) }).await }
        }))
        .await;
        assert!(results.into_iter().all(|r| r.is_ok()));
    }
}
