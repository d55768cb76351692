//! # Conduit Resilience
//!
//! Resilience policies for the Conduit pipeline engine: circuit breaker,
//! retry with backoff, bulkhead, timeout, and rate limiter, plus a
//! registry that stores policies by name and composes them left-to-right.
//!
//! Every policy exposes the same surface: `execute(operation)`, a metrics
//! snapshot with stable field names, and `reset`. Rejections (circuit open,
//! bulkhead full, rate limited) are a distinct error class from work
//! errors so callers can tell shed load apart from failures.

pub mod config;
pub mod error;
pub mod metrics;
pub mod patterns;

mod policy;
mod registry;

pub use config::{ConfigError, ConfigResult, PolicyConfig};
pub use error::{ErrorKind, ResilienceError, ResilienceResult};
pub use metrics::{PolicyMetrics, PolicyMetricsSnapshot};
pub use patterns::{
    BackoffStrategy,
    Bulkhead,
    BulkheadConfig,
    BulkheadStats,
    CircuitBreaker,
    CircuitBreakerConfig,
    CircuitBreakerStats,
    CircuitState,
    RateLimiter,
    RateLimiterConfig,
    RetryConfig,
    RetryPolicy,
    RetryStats,
    TimeoutConfig,
    TimeoutPolicy,
    TimeoutStrategy,
    timeout,
};
pub use policy::{ResiliencePattern, ResiliencePolicy};
pub use registry::PolicyRegistry;

/// Prelude
pub mod prelude {
    pub use crate::error::{ErrorKind, ResilienceError, ResilienceResult};
    pub use crate::patterns::{
        Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, CircuitState,
        RateLimiter, RateLimiterConfig, RetryConfig, RetryPolicy, TimeoutPolicy, timeout,
    };
    pub use crate::policy::{ResiliencePattern, ResiliencePolicy};
    pub use crate::registry::PolicyRegistry;
}
