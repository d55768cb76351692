//! Retry policy with configurable backoff and jitter.
//!
//! `max_retries` uniformly means retries in addition to the one initial
//! attempt: an operation runs at most `max_retries + 1` times.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::{ConfigError, ConfigResult, PolicyConfig};
use crate::error::{ErrorKind, ResilienceError, ResilienceResult};
use crate::metrics::{PolicyMetrics, PolicyMetricsSnapshot};
use crate::policy::ResiliencePattern;

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Every delay equals `base_delay`.
    Fixed,
    /// Delay for retry `k` is `base_delay * k`.
    Linear,
    /// Delay for retry `k` is `base_delay * multiplier^(k - 1)`.
    Exponential,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries beyond the initial attempt.
    pub max_retries: usize,
    /// Base delay fed into the backoff strategy.
    pub base_delay: Duration,
    /// How delays grow across attempts.
    pub strategy: BackoffStrategy,
    /// Multiplier for [`BackoffStrategy::Exponential`].
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiply each delay by a uniform factor in `[0.75, 1.25]`.
    pub use_jitter: bool,
    /// Error kinds eligible for retry. Empty means every kind except
    /// rejections and cancellation; rejections are retried only when their
    /// kind is listed here explicitly.
    pub retryable_errors: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(100))
    }
}

impl RetryConfig {
    /// Fixed-delay configuration.
    #[must_use]
    pub fn fixed(max_retries: usize, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            strategy: BackoffStrategy::Fixed,
            multiplier: 1.0,
            max_delay: Duration::from_secs(30),
            use_jitter: false,
            retryable_errors: Vec::new(),
        }
    }

    /// Linear backoff configuration.
    #[must_use]
    pub fn linear(max_retries: usize, base_delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Linear,
            ..Self::fixed(max_retries, base_delay)
        }
    }

    /// Exponential backoff configuration with a 2.0 multiplier.
    #[must_use]
    pub fn exponential(max_retries: usize, base_delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            multiplier: 2.0,
            ..Self::fixed(max_retries, base_delay)
        }
    }

    /// Enable jitter.
    #[must_use]
    pub fn with_jitter(mut self) -> Self {
        self.use_jitter = true;
        self
    }

    /// Restrict retries to the listed error kinds.
    #[must_use]
    pub fn retry_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_errors = kinds.into_iter().collect();
        self
    }
}

impl PolicyConfig for RetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.base_delay.is_zero() {
            return Err(ConfigError::validation("base_delay must be greater than 0"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::validation("max_delay must be >= base_delay"));
        }
        if self.strategy == BackoffStrategy::Exponential && self.multiplier <= 1.0 {
            return Err(ConfigError::validation(
                "exponential multiplier must be > 1.0",
            ));
        }
        Ok(())
    }
}

/// Retry policy.
pub struct RetryPolicy {
    name: String,
    config: RetryConfig,
    enabled: bool,
    metrics: PolicyMetrics,
    retry_attempts: AtomicU64,
    successful_after_retry: AtomicU64,
}

impl RetryPolicy {
    /// Create a policy with the default exponential configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, RetryConfig::default())
    }

    /// Create a policy with a custom configuration.
    #[must_use]
    pub fn with_config(name: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            name: name.into(),
            config,
            enabled: true,
            metrics: PolicyMetrics::new(),
            retry_attempts: AtomicU64::new(0),
            successful_after_retry: AtomicU64::new(0),
        }
    }

    /// Disable the policy; a disabled policy runs the operation once.
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

    /// Whether retries are performed.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before retry `attempt` (1-indexed), capped and jittered per
    /// the configuration.
    #[must_use]
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let attempt = attempt.max(1);
        let base = self.config.base_delay.as_secs_f64();
        let raw = match self.config.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base * attempt as f64,
            BackoffStrategy::Exponential => {
                base * self.config.multiplier.powi(attempt as i32 - 1)
            }
        };
        let capped = raw.min(self.config.max_delay.as_secs_f64());
        let factor = if self.config.use_jitter {
            0.75 + fastrand::f64() * 0.5
        } else {
            1.0
        };
        Duration::from_secs_f64(capped * factor)
    }

    /// Whether `error` is eligible for retry under this policy.
    ///
    /// Rejections must propagate: with an empty `retryable_errors` list they
    /// are never retried, and neither is cancellation or an already
    /// exhausted retry.
    #[must_use]
    pub fn should_retry(&self, error: &ResilienceError) -> bool {
        let kind = error.kind();
        if self.config.retryable_errors.is_empty() {
            if error.is_rejection() {
                return false;
            }
            return !matches!(
                kind,
                ErrorKind::Cancelled | ErrorKind::RetryExhausted | ErrorKind::Config
            ) && match error {
                ResilienceError::Application { retryable, .. } => *retryable,
                _ => true,
            };
        }
        self.config.retryable_errors.contains(&kind)
    }

    /// Execute an operation, retrying per the configuration.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> ResilienceResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = ResilienceResult<T>> + Send,
        T: Send,
    {
        let started = Instant::now();
        let budget = if self.enabled { self.config.max_retries } else { 0 };

        let mut retries = 0usize;
        loop {
            match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        self.successful_after_retry.fetch_add(1, Ordering::Relaxed);
                        self.metrics.mark_retried();
                    }
                    self.metrics.record_success(started.elapsed());
                    return Ok(value);
                }
                Err(error) => {
                    if !self.should_retry(&error) {
                        if retries > 0 {
                            self.metrics.mark_retried();
                        }
                        self.metrics.record_failure(started.elapsed());
                        return Err(error);
                    }
                    if retries >= budget {
                        if retries > 0 {
                            self.metrics.mark_retried();
                        }
                        self.metrics.record_failure(started.elapsed());
                        return if budget == 0 {
                            Err(error)
                        } else {
                            Err(ResilienceError::retry_exhausted(retries, error))
                        };
                    }

                    retries += 1;
                    self.retry_attempts.fetch_add(1, Ordering::Relaxed);
                    let delay = self.calculate_delay(retries);
                    debug!(
                        policy = %self.name,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Retry-specific statistics.
    #[must_use]
    pub fn stats(&self) -> RetryStats {
        RetryStats {
            retry_attempts: self.retry_attempts.load(Ordering::Relaxed),
            successful_after_retry: self.successful_after_retry.load(Ordering::Relaxed),
        }
    }

    /// Metrics snapshot with retry-specific additions.
    #[must_use]
    pub fn metrics(&self) -> PolicyMetricsSnapshot {
        let stats = self.stats();
        self.metrics
            .snapshot(&self.name, ResiliencePattern::Retry)
            .with_extra("retry_attempts", stats.retry_attempts)
            .with_extra("successful_after_retry", stats.successful_after_retry)
    }

    /// Zero metrics and retry counters.
    pub fn reset_all(&self) {
        self.metrics.reset();
        self.retry_attempts.store(0, Ordering::Relaxed);
        self.successful_after_retry.store(0, Ordering::Relaxed);
    }
}

/// Retry-specific statistics.
#[derive(Debug, Clone, Copy)]
pub struct RetryStats {
    /// Total individual retries performed.
    pub retry_attempts: u64,
    /// Operations that eventually succeeded after at least one retry.
    pub successful_after_retry: u64,
}
