//! Pipeline execution configuration.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use conduit_resilience::{ConfigError, ConfigResult, PolicyConfig};

use crate::cache::EvictionPolicy;

/// What the executor does with an error nothing absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorStrategy {
    /// Rethrow immediately.
    FailFast,
    /// Propagate so an enclosing retry behavior can handle it.
    Retry,
    /// Return the configured default result and log.
    Continue,
    /// Tag the context and rethrow a dead-letter error wrapping the
    /// original.
    DeadLetter,
    /// Rethrow; the caller owns handling.
    Custom,
}

/// Executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfiguration {
    /// Concurrent executions admitted at once; `0` means unbounded.
    pub max_concurrency: usize,
    /// Deadline wrapped around the whole behavior chain, when set.
    pub default_timeout: Option<Duration>,
    /// Retries (beyond the initial attempt) wrapped around the chain.
    pub max_retries: usize,
    /// Delay between configuration-driven retries.
    pub retry_delay: Duration,
    /// Whether executor-level caching is active.
    pub cache_enabled: bool,
    /// TTL for executor-cached results.
    pub default_cache_duration: Duration,
    /// Entry limit for the executor cache.
    pub max_cache_size: usize,
    /// Victim selection when the cache is over its limit.
    pub eviction_policy: EvictionPolicy,
    /// What happens to unabsorbed errors.
    pub error_strategy: ErrorStrategy,
    /// Whether validation interceptors participate.
    pub validation_enabled: bool,
    /// Whether execution metrics are recorded.
    pub metrics_enabled: bool,
    /// Whether the tracing interceptor is registered by the factory.
    pub tracing_enabled: bool,
    /// Whether the dead-letter strategy may tag contexts.
    pub dead_letter_enabled: bool,
    /// Whether the factory builds this pipeline for concurrent use.
    pub async_execution: bool,
}

impl Default for PipelineConfiguration {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            default_timeout: None,
            max_retries: 0,
            retry_delay: Duration::from_millis(100),
            cache_enabled: false,
            default_cache_duration: Duration::from_secs(300),
            max_cache_size: 1000,
            eviction_policy: EvictionPolicy::Lru,
            error_strategy: ErrorStrategy::FailFast,
            validation_enabled: false,
            metrics_enabled: true,
            tracing_enabled: false,
            dead_letter_enabled: false,
            async_execution: true,
        }
    }
}

impl PipelineConfiguration {
    /// Derive the admission semaphore, `None` when unbounded.
    #[must_use]
    pub fn concurrency_semaphore(&self) -> Option<Arc<Semaphore>> {
        (self.max_concurrency > 0).then(|| Arc::new(Semaphore::new(self.max_concurrency)))
    }
}

impl PolicyConfig for PipelineConfiguration {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(timeout) = self.default_timeout
            && timeout.is_zero()
        {
            return Err(ConfigError::validation("default_timeout must be greater than 0"));
        }
        if self.cache_enabled {
            if self.default_cache_duration.is_zero() {
                return Err(ConfigError::validation(
                    "default_cache_duration must be greater than 0",
                ));
            }
            if self.max_cache_size == 0 {
                return Err(ConfigError::validation(
                    "max_cache_size must be greater than 0",
                ));
            }
        }
        Ok(())
    }
}
