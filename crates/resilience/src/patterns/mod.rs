//! Resilience pattern implementations.

pub mod bulkhead;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;
pub mod timeout;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadStats};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{BackoffStrategy, RetryConfig, RetryPolicy, RetryStats};
pub use timeout::{TimeoutConfig, TimeoutPolicy, TimeoutStrategy, timeout};
