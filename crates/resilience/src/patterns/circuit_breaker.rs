//! Circuit breaker with a windowed failure-rate detector.
//!
//! Outcomes are recorded into a rolling sampling window. While `Closed`, the
//! breaker opens once the window holds at least `minimum_throughput` calls
//! and the failure ratio reaches `failure_rate_threshold`. While `Open`, all
//! calls fail fast; after `break_duration` a single probe is admitted in
//! `HalfOpen`. One probe success closes the circuit, one failure re-opens
//! it. `Isolated` is entered manually and only [`CircuitBreaker::reset`]
//! leaves it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ConfigResult, PolicyConfig};
use crate::error::{ResilienceError, ResilienceResult};
use crate::metrics::{PolicyMetrics, PolicyMetricsSnapshot};
use crate::policy::ResiliencePattern;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls flow through; outcomes are sampled.
    Closed,
    /// Calls fail fast until the break elapses.
    Open,
    /// One probe call is in flight.
    HalfOpen,
    /// Manually isolated; only `reset()` restores `Closed`.
    Isolated,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
            Self::Isolated => write!(f, "isolated"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure ratio in `(0, 1]` that opens the circuit.
    pub failure_rate_threshold: f64,
    /// Minimum calls in the window before the ratio is evaluated.
    pub minimum_throughput: usize,
    /// How far back outcomes are sampled.
    pub sampling_window: Duration,
    /// How long the circuit stays open before admitting a probe.
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            minimum_throughput: 10,
            sampling_window: Duration::from_secs(60),
            break_duration: Duration::from_secs(30),
        }
    }
}

impl PolicyConfig for CircuitBreakerConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 1.0) {
            return Err(ConfigError::validation(
                "failure_rate_threshold must be in (0, 1]",
            ));
        }
        if self.minimum_throughput == 0 {
            return Err(ConfigError::validation(
                "minimum_throughput must be greater than 0",
            ));
        }
        if self.sampling_window.is_zero() {
            return Err(ConfigError::validation(
                "sampling_window must be greater than 0",
            ));
        }
        if self.break_duration.is_zero() {
            return Err(ConfigError::validation(
                "break_duration must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// `(recorded_at, success)` outcomes inside the sampling window.
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn prune(&mut self, window: Duration) {
        let now = Instant::now();
        while let Some(&(at, _)) = self.outcomes.front() {
            if now.duration_since(at) > window {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn failure_ratio(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|(_, ok)| !ok).count();
        failures as f64 / self.outcomes.len() as f64
    }
}

/// Windowed failure-rate circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    enabled: bool,
    inner: Mutex<BreakerState>,
    metrics: PolicyMetrics,
}

impl CircuitBreaker {
    /// Create a breaker with the default configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    /// Create a breaker with a custom configuration.
    #[must_use]
    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            enabled: true,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                outcomes: VecDeque::new(),
                opened_at: None,
            }),
            metrics: PolicyMetrics::new(),
        }
    }

    /// Disable the breaker; a disabled breaker passes every call through.
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

    /// Whether the breaker participates in admission decisions.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current circuit state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Manually isolate the circuit. Every call is rejected until `reset()`.
    pub fn isolate(&self) {
        let mut inner = self.inner.lock();
        let from = inner.state;
        inner.state = CircuitState::Isolated;
        warn!(
            breaker = %self.name,
            state_transition = %format!("{from} -> {}", CircuitState::Isolated),
            "circuit breaker isolated"
        );
    }

    /// Restore `Closed` and clear the sampling window.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let from = inner.state;
        inner.state = CircuitState::Closed;
        inner.outcomes.clear();
        inner.opened_at = None;
        info!(
            breaker = %self.name,
            state_transition = %format!("{from} -> {}", CircuitState::Closed),
            "circuit breaker reset"
        );
    }

    /// Decide whether a call may proceed, applying time-based transitions.
    fn try_acquire(&self) -> ResilienceResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or_else(Instant::now);
                let since_open = opened_at.elapsed();
                if since_open >= self.config.break_duration {
                    inner.state = CircuitState::HalfOpen;
                    info!(
                        breaker = %self.name,
                        state_transition = %format!("{} -> {}", CircuitState::Open, CircuitState::HalfOpen),
                        "circuit breaker admitting probe"
                    );
                    Ok(())
                } else {
                    Err(ResilienceError::circuit_open(
                        &self.name,
                        CircuitState::Open.to_string(),
                        self.config.break_duration.checked_sub(since_open),
                    ))
                }
            }
            // The probe that triggered the transition is already in flight.
            CircuitState::HalfOpen => Err(ResilienceError::circuit_open(
                &self.name,
                CircuitState::HalfOpen.to_string(),
                None,
            )),
            CircuitState::Isolated => Err(ResilienceError::circuit_open(
                &self.name,
                CircuitState::Isolated.to_string(),
                None,
            )),
        }
    }

    /// Record a successful outcome.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.outcomes.clear();
                inner.opened_at = None;
                info!(
                    breaker = %self.name,
                    state_transition = %format!("{} -> {}", CircuitState::HalfOpen, CircuitState::Closed),
                    "circuit breaker closed after successful probe"
                );
            }
            CircuitState::Closed => {
                inner.outcomes.push_back((Instant::now(), true));
                inner.prune(self.config.sampling_window);
            }
            CircuitState::Open | CircuitState::Isolated => {}
        }
    }

    /// Record a failed outcome, opening the circuit when the window trips.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(
                    breaker = %self.name,
                    state_transition = %format!("{} -> {}", CircuitState::HalfOpen, CircuitState::Open),
                    "circuit breaker re-opened after failed probe"
                );
            }
            CircuitState::Closed => {
                inner.outcomes.push_back((Instant::now(), false));
                inner.prune(self.config.sampling_window);
                let calls = inner.outcomes.len();
                let ratio = inner.failure_ratio();
                if calls >= self.config.minimum_throughput
                    && ratio >= self.config.failure_rate_threshold
                {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        breaker = %self.name,
                        state_transition = %format!("{} -> {}", CircuitState::Closed, CircuitState::Open),
                        calls_in_window = calls,
                        failure_ratio = ratio,
                        threshold = self.config.failure_rate_threshold,
                        "circuit breaker opened"
                    );
                } else {
                    debug!(
                        breaker = %self.name,
                        calls_in_window = calls,
                        failure_ratio = ratio,
                        "failure recorded in closed state"
                    );
                }
            }
            CircuitState::Open | CircuitState::Isolated => {}
        }
    }

    /// Execute an operation under breaker protection.
    ///
    /// Rejections count toward the rejection metric, not failures.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> ResilienceResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = ResilienceResult<T>> + Send,
        T: Send,
    {
        if !self.enabled {
            let started = Instant::now();
            let result = operation().await;
            match &result {
                Ok(_) => self.metrics.record_success(started.elapsed()),
                Err(_) => self.metrics.record_failure(started.elapsed()),
            }
            return result;
        }

        if let Err(rejection) = self.try_acquire() {
            self.metrics.record_rejection();
            return Err(rejection);
        }

        let started = Instant::now();
        let result = operation().await;
        match &result {
            Ok(_) => {
                self.record_success();
                self.metrics.record_success(started.elapsed());
            }
            Err(_) => {
                self.record_failure();
                self.metrics.record_failure(started.elapsed());
            }
        }
        result
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock();
        inner.prune(self.config.sampling_window);
        CircuitBreakerStats {
            state: inner.state,
            calls_in_window: inner.outcomes.len(),
            failure_ratio: inner.failure_ratio(),
        }
    }

    /// Metrics snapshot with breaker-specific additions.
    #[must_use]
    pub fn metrics(&self) -> PolicyMetricsSnapshot {
        let stats = self.stats();
        self.metrics
            .snapshot(&self.name, ResiliencePattern::CircuitBreaker)
            .with_extra("state", stats.state.to_string())
            .with_extra("calls_in_window", stats.calls_in_window as u64)
            .with_extra("window_failure_ratio", stats.failure_ratio)
    }

    /// Reset metrics and restore `Closed`.
    pub fn reset_all(&self) {
        self.reset();
        self.metrics.reset();
    }
}

/// Point-in-time breaker statistics.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Current state.
    pub state: CircuitState,
    /// Outcomes currently inside the sampling window.
    pub calls_in_window: usize,
    /// Failure ratio over the window.
    pub failure_ratio: f64,
}
