//! Sliding-window rate limiter.
//!
//! The window is divided into `segments_per_window` equal buckets; current
//! utilization is the sum of admissions across the most recent
//! `segments_per_window` buckets relative to now. When the window is full,
//! up to `queue_limit` callers wait in FIFO order for permits to age out;
//! any arrival beyond that is rejected immediately.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{ConfigError, ConfigResult, PolicyConfig};
use crate::error::{ResilienceError, ResilienceResult};
use crate::metrics::{PolicyMetrics, PolicyMetricsSnapshot};
use crate::policy::ResiliencePattern;

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Permits available per window.
    pub max_permits: usize,
    /// Window duration.
    pub window: Duration,
    /// Callers allowed to wait for a permit.
    pub queue_limit: usize,
    /// Buckets the window is divided into (at least 2).
    pub segments_per_window: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_permits: 100,
            window: Duration::from_secs(1),
            queue_limit: 0,
            segments_per_window: 10,
        }
    }
}

impl PolicyConfig for RateLimiterConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.max_permits == 0 {
            return Err(ConfigError::validation("max_permits must be greater than 0"));
        }
        if self.window.is_zero() {
            return Err(ConfigError::validation("window must be greater than 0"));
        }
        if self.segments_per_window < 2 {
            return Err(ConfigError::validation("segments_per_window must be at least 2"));
        }
        Ok(())
    }
}

/// Admissions per segment, oldest first.
#[derive(Debug, Default)]
struct Window {
    buckets: VecDeque<(u64, usize)>,
}

impl Window {
    fn prune(&mut self, now_segment: u64, segments: u64) {
        let oldest_kept = now_segment.saturating_sub(segments - 1);
        while let Some(&(segment, _)) = self.buckets.front() {
            if segment < oldest_kept {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn in_window(&self) -> usize {
        self.buckets.iter().map(|&(_, count)| count).sum()
    }

    fn record(&mut self, now_segment: u64) {
        match self.buckets.back_mut() {
            Some((segment, count)) if *segment == now_segment => *count += 1,
            _ => self.buckets.push_back((now_segment, 1)),
        }
    }
}

/// Sliding-window rate limiter.
pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    enabled: bool,
    started: Instant,
    window: Mutex<Window>,
    queued: AtomicUsize,
    /// Held for the whole wait so queued callers are served oldest first.
    turn: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    metrics: PolicyMetrics,
}

impl RateLimiter {
    /// Create a limiter with the default configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, RateLimiterConfig::default())
    }

    /// Create a limiter with a custom configuration.
    #[must_use]
    pub fn with_config(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        Self {
            name: name.into(),
            config,
            enabled: true,
            started: Instant::now(),
            window: Mutex::new(Window::default()),
            queued: AtomicUsize::new(0),
            turn: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
            metrics: PolicyMetrics::new(),
        }
    }

    /// Disable the limiter; a disabled limiter admits every call.
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

    fn segment_duration(&self) -> Duration {
        self.config.window / self.config.segments_per_window as u32
    }

    fn current_segment(&self) -> u64 {
        let seg = self.segment_duration();
        (self.started.elapsed().as_nanos() / seg.as_nanos().max(1)) as u64
    }

    /// Admissions currently counted in the window.
    #[must_use]
    pub fn in_window(&self) -> usize {
        let mut window = self.window.lock();
        window.prune(self.current_segment(), self.config.segments_per_window as u64);
        window.in_window()
    }

    /// Callers currently waiting for a permit.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Try to take a permit without waiting. Returns the delay until the
    /// oldest counted admission ages out when the window is full.
    fn try_admit(&self) -> Result<(), Duration> {
        let now_segment = self.current_segment();
        let mut window = self.window.lock();
        window.prune(now_segment, self.config.segments_per_window as u64);
        if window.in_window() < self.config.max_permits {
            window.record(now_segment);
            return Ok(());
        }
        let retry_after = window.buckets.front().map_or_else(
            || self.segment_duration(),
            |&(oldest, _)| {
                // Bucket `oldest` ages out when the current segment index
                // reaches `oldest + segments_per_window`.
                let release = self
                    .segment_duration()
                    .saturating_mul((oldest + self.config.segments_per_window as u64) as u32);
                release.saturating_sub(self.started.elapsed())
            },
        );
        Err(retry_after.max(Duration::from_millis(1)))
    }

    /// Acquire a permit, queueing FIFO when the window is full.
    pub async fn acquire(&self, cancel: Option<&CancellationToken>) -> ResilienceResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let retry_after = match self.try_admit() {
            Ok(()) => return Ok(()),
            Err(delay) => delay,
        };

        // Window full: claim a queue slot or reject outright.
        let waiting = self.queued.fetch_add(1, Ordering::AcqRel);
        if waiting >= self.config.queue_limit {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(ResilienceError::rate_limited(&self.name, Some(retry_after)));
        }
        debug!(limiter = %self.name, queued = waiting + 1, "caller queued");

        let result = self.wait_for_permit(cancel).await;
        self.queued.fetch_sub(1, Ordering::AcqRel);
        result
    }

    async fn wait_for_permit(&self, cancel: Option<&CancellationToken>) -> ResilienceResult<()> {
        let _turn = tokio::select! {
            () = self.shutdown.cancelled() => return Err(ResilienceError::Cancelled),
            guard = self.turn.lock() => guard,
        };
        loop {
            let delay = match self.try_admit() {
                Ok(()) => return Ok(()),
                Err(delay) => delay,
            };
            let sleep = tokio::time::sleep(delay);
            match cancel {
                Some(token) => tokio::select! {
                    () = self.shutdown.cancelled() => return Err(ResilienceError::Cancelled),
                    () = token.cancelled() => return Err(ResilienceError::Cancelled),
                    () = sleep => {}
                },
                None => tokio::select! {
                    () = self.shutdown.cancelled() => return Err(ResilienceError::Cancelled),
                    () = sleep => {}
                },
            }
        }
    }

    /// Execute an operation under the limiter.
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
        if let Err(error) = self.acquire(cancel).await {
            if error.is_rejection() {
                self.metrics.record_rejection();
            }
            return Err(error);
        }

        let started = Instant::now();
        let result = operation().await;
        match &result {
            Ok(_) => self.metrics.record_success(started.elapsed()),
            Err(_) => self.metrics.record_failure(started.elapsed()),
        }
        result
    }

    /// Wake every queued waiter with `Cancelled` and refuse future queueing.
    ///
    /// Call on teardown; `Drop` does the same.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Metrics snapshot with limiter-specific additions.
    #[must_use]
    pub fn metrics(&self) -> PolicyMetricsSnapshot {
        self.metrics
            .snapshot(&self.name, ResiliencePattern::RateLimiter)
            .with_extra("in_window", self.in_window() as u64)
            .with_extra("queued", self.queued() as u64)
    }

    /// Zero metrics and clear the window.
    pub fn reset_all(&self) {
        self.metrics.reset();
        self.window.lock().buckets.clear();
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
