//! Uniform policy surface over all resilience patterns.
//!
//! Pipelines and the registry hold policies as tagged variants rather than
//! trait objects: `execute` stays generic over the protected operation's
//! output type, which a dyn-compatible trait could not express.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::ResilienceResult;
use crate::metrics::PolicyMetricsSnapshot;
use crate::patterns::{Bulkhead, CircuitBreaker, RateLimiter, RetryPolicy, TimeoutPolicy};

/// The resilience patterns Conduit ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResiliencePattern {
    /// Windowed failure-rate circuit breaker.
    CircuitBreaker,
    /// Retry with backoff.
    Retry,
    /// Bounded concurrency plus bounded queue.
    Bulkhead,
    /// Deadline enforcement.
    Timeout,
    /// Sliding-window admission control.
    RateLimiter,
}

impl fmt::Display for ResiliencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitBreaker => write!(f, "circuit-breaker"),
            Self::Retry => write!(f, "retry"),
            Self::Bulkhead => write!(f, "bulkhead"),
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimiter => write!(f, "rate-limiter"),
        }
    }
}

/// A named resilience policy of any pattern.
#[derive(Clone)]
pub enum ResiliencePolicy {
    /// Circuit breaker policy.
    CircuitBreaker(Arc<CircuitBreaker>),
    /// Retry policy.
    Retry(Arc<RetryPolicy>),
    /// Bulkhead policy.
    Bulkhead(Arc<Bulkhead>),
    /// Timeout policy.
    Timeout(Arc<TimeoutPolicy>),
    /// Rate limiter policy.
    RateLimiter(Arc<RateLimiter>),
}

impl ResiliencePolicy {
    /// Policy name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::CircuitBreaker(p) => p.name(),
            Self::Retry(p) => p.name(),
            Self::Bulkhead(p) => p.name(),
            Self::Timeout(p) => p.name(),
            Self::RateLimiter(p) => p.name(),
        }
    }

    /// Which pattern this policy implements.
    #[must_use]
    pub const fn pattern(&self) -> ResiliencePattern {
        match self {
            Self::CircuitBreaker(_) => ResiliencePattern::CircuitBreaker,
            Self::Retry(_) => ResiliencePattern::Retry,
            Self::Bulkhead(_) => ResiliencePattern::Bulkhead,
            Self::Timeout(_) => ResiliencePattern::Timeout,
            Self::RateLimiter(_) => ResiliencePattern::RateLimiter,
        }
    }

    /// Whether the policy participates in protection decisions.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::CircuitBreaker(p) => p.is_enabled(),
            Self::Retry(p) => p.is_enabled(),
            Self::Bulkhead(p) => p.is_enabled(),
            Self::Timeout(p) => p.is_enabled(),
            Self::RateLimiter(p) => p.is_enabled(),
        }
    }

    /// Execute an operation under this policy.
    ///
    /// The operation must be re-invocable (`Fn`): a retry policy calls it
    /// once per attempt, and composed chains re-enter inner policies the
    /// same way.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> ResilienceResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = ResilienceResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        match self {
            Self::CircuitBreaker(p) => p.execute(operation).await,
            Self::Retry(p) => p.execute(operation).await,
            Self::Bulkhead(p) => p.execute(operation).await,
            Self::Timeout(p) => p.execute(operation).await,
            Self::RateLimiter(p) => p.execute(operation).await,
        }
    }

    /// Metrics snapshot, including pattern-specific additions.
    #[must_use]
    pub fn metrics(&self) -> PolicyMetricsSnapshot {
        match self {
            Self::CircuitBreaker(p) => p.metrics(),
            Self::Retry(p) => p.metrics(),
            Self::Bulkhead(p) => p.metrics(),
            Self::Timeout(p) => p.metrics(),
            Self::RateLimiter(p) => p.metrics(),
        }
    }

    /// Reset metrics and any internal pattern state.
    pub fn reset(&self) {
        match self {
            Self::CircuitBreaker(p) => p.reset_all(),
            Self::Retry(p) => p.reset_all(),
            Self::Bulkhead(p) => p.reset_all(),
            Self::Timeout(p) => p.reset_all(),
            Self::RateLimiter(p) => p.reset_all(),
        }
    }
}

impl fmt::Debug for ResiliencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResiliencePolicy")
            .field("name", &self.name())
            .field("pattern", &self.pattern())
            .finish_non_exhaustive()
    }
}

impl From<CircuitBreaker> for ResiliencePolicy {
    fn from(policy: CircuitBreaker) -> Self {
        Self::CircuitBreaker(Arc::new(policy))
    }
}

impl From<RetryPolicy> for ResiliencePolicy {
    fn from(policy: RetryPolicy) -> Self {
        Self::Retry(Arc::new(policy))
    }
}

impl From<Bulkhead> for ResiliencePolicy {
    fn from(policy: Bulkhead) -> Self {
        Self::Bulkhead(Arc::new(policy))
    }
}

impl From<TimeoutPolicy> for ResiliencePolicy {
    fn from(policy: TimeoutPolicy) -> Self {
        Self::Timeout(Arc::new(policy))
    }
}

impl From<RateLimiter> for ResiliencePolicy {
    fn from(policy: RateLimiter) -> Self {
        Self::RateLimiter(Arc::new(policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResilienceError;
    use std::time::Duration;

    #[test]
    fn test_pattern_display_is_stable() {
        assert_eq!(ResiliencePattern::CircuitBreaker.to_string(), "circuit-breaker");
        assert_eq!(ResiliencePattern::RateLimiter.to_string(), "rate-limiter");
    }

    #[tokio::test]
    async fn test_enum_dispatch_runs_underlying_policy() {
        let policy: ResiliencePolicy = TimeoutPolicy::new("t", Duration::from_millis(50)).into();
        assert_eq!(policy.name(), "t");
        assert_eq!(policy.pattern(), ResiliencePattern::Timeout);

        let result = policy
            .execute(|| async { Ok::<_, ResilienceError>(5) })
            .await;
        assert_eq!(result.unwrap(), 5);
        assert_eq!(policy.metrics().total, 1);

        policy.reset();
        assert_eq!(policy.metrics().total, 0);
    }
}
