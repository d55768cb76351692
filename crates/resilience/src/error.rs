//! Error types for resilience operations.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during resilience operations.
///
/// Rejections (circuit open, bulkhead full, rate limited) are distinct
/// variants from work errors so callers can tell shed load apart from
/// failed work.
#[derive(Error, Debug, Clone)]
pub enum ResilienceError {
    /// Operation exceeded its deadline.
    #[error("operation timed out after {duration:?}")]
    Timeout {
        /// Duration that was exceeded.
        duration: Duration,
    },

    /// Circuit breaker refused the call.
    #[error("circuit breaker '{name}' is {state}")]
    CircuitOpen {
        /// Policy that refused the call.
        name: String,
        /// Circuit state at rejection time.
        state: String,
        /// Time until the next probe is admitted, if known.
        retry_after: Option<Duration>,
    },

    /// Bulkhead refused the call.
    #[error("bulkhead '{name}' is full (max_concurrent: {max_concurrent}, queued: {queued})")]
    BulkheadFull {
        /// Policy that refused the call.
        name: String,
        /// Concurrency limit.
        max_concurrent: usize,
        /// Callers queued at rejection time.
        queued: usize,
    },

    /// Rate limiter refused the call.
    #[error("rate limiter '{name}' rejected the call")]
    RateLimited {
        /// Policy that refused the call.
        name: String,
        /// Time until a permit frees up, if known.
        retry_after: Option<Duration>,
    },

    /// All attempts failed. `retries` counts retries in addition to the one
    /// initial attempt.
    #[error("retry budget exhausted after {retries} retries ({} attempts total): {last_error}", .retries + 1)]
    RetryExhausted {
        /// Retries performed beyond the initial attempt.
        retries: usize,
        /// The error from the final attempt.
        last_error: Box<ResilienceError>,
    },

    /// The operation was cancelled.
    #[error("operation was cancelled")]
    Cancelled,

    /// Registry lookup miss.
    #[error("policy not found: {name}")]
    PolicyNotFound {
        /// Requested policy name.
        name: String,
    },

    /// Invalid policy configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error produced by the protected operation itself.
    #[error("{message}")]
    Application {
        /// Short human-readable message.
        message: String,
        /// Whether a retry policy may re-run the operation.
        retryable: bool,
        /// Underlying cause, when one exists.
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },
}

/// Coarse classification of a [`ResilienceError`], used by retry conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Deadline exceeded.
    Timeout,
    /// Circuit breaker rejection.
    CircuitOpen,
    /// Bulkhead rejection.
    BulkheadFull,
    /// Rate limiter rejection.
    RateLimited,
    /// Retry budget exhausted.
    RetryExhausted,
    /// Cooperative cancellation.
    Cancelled,
    /// Registry lookup miss.
    PolicyNotFound,
    /// Configuration error.
    Config,
    /// Operation-level error.
    Application,
}

impl ResilienceError {
    /// Create a timeout error.
    #[must_use]
    pub const fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a circuit-open rejection.
    pub fn circuit_open(
        name: impl Into<String>,
        state: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        Self::CircuitOpen {
            name: name.into(),
            state: state.into(),
            retry_after,
        }
    }

    /// Create a bulkhead-full rejection.
    pub fn bulkhead_full(name: impl Into<String>, max_concurrent: usize, queued: usize) -> Self {
        Self::BulkheadFull {
            name: name.into(),
            max_concurrent,
            queued,
        }
    }

    /// Create a rate-limited rejection.
    pub fn rate_limited(name: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            name: name.into(),
            retry_after,
        }
    }

    /// Create a retry-exhausted error wrapping the final attempt's error.
    #[must_use]
    pub fn retry_exhausted(retries: usize, last_error: ResilienceError) -> Self {
        Self::RetryExhausted {
            retries,
            last_error: Box::new(last_error),
        }
    }

    /// Create an application error.
    pub fn application(message: impl Into<String>, retryable: bool) -> Self {
        Self::Application {
            message: message.into(),
            retryable,
            source: None,
        }
    }

    /// Create an application error wrapping an underlying cause.
    pub fn application_with_source(
        message: impl Into<String>,
        retryable: bool,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Application {
            message: message.into(),
            retryable,
            source: Some(Arc::new(source)),
        }
    }

    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::BulkheadFull { .. } => ErrorKind::BulkheadFull,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::PolicyNotFound { .. } => ErrorKind::PolicyNotFound,
            Self::Config(_) => ErrorKind::Config,
            Self::Application { .. } => ErrorKind::Application,
        }
    }

    /// Whether this error is an admission rejection rather than failed work.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::BulkheadFull { .. } | Self::RateLimited { .. }
        )
    }

    /// Get a retry delay hint if the rejecting policy provided one.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } | Self::RateLimited { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }
}

/// Result type for resilience operations.
pub type ResilienceResult<T> = Result<T, ResilienceError>;
