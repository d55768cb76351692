//! Pipeline error types.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use conduit_resilience::ResilienceError;

/// Errors surfaced by pipeline execution.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    /// Cooperative cancellation or an external token trip.
    #[error("execution cancelled")]
    Cancelled,

    /// A deadline was exceeded.
    #[error("timed out after {duration:?}{}", .stage.as_deref().map(|s| format!(" in stage '{s}'")).unwrap_or_default())]
    Timeout {
        /// The exceeded deadline.
        duration: Duration,
        /// Stage that was running, when known.
        stage: Option<String>,
    },

    /// Admission was refused by a resilience policy or decorating stage.
    #[error("rejected by '{policy}'")]
    Rejected {
        /// Name of the policy or stage that refused the call.
        policy: String,
        /// Time until admission may succeed, if known.
        retry_after: Option<Duration>,
    },

    /// All attempts failed. `retries` counts retries in addition to the one
    /// initial attempt.
    #[error("retry budget exhausted after {retries} retries ({} attempts total): {source}", .retries + 1)]
    RetryExhausted {
        /// Retries performed beyond the initial attempt.
        retries: usize,
        /// The error from the final attempt.
        source: Box<PipelineError>,
    },

    /// A validation predicate refused the input.
    #[error("validation failed in '{stage}': {message}")]
    Validation {
        /// Validating stage or interceptor name.
        stage: String,
        /// Why the input was refused.
        message: String,
    },

    /// No branch predicate matched and no default branch exists.
    #[error("no matching branch in '{pipeline}'")]
    NoMatchingBranch {
        /// The multi-branch pipeline name.
        pipeline: String,
    },

    /// The error strategy diverted the failure to the dead-letter path.
    #[error("dead-lettered: {reason}")]
    DeadLetter {
        /// Why the execution was diverted.
        reason: String,
        /// The original failure.
        source: Box<PipelineError>,
    },

    /// `build()` was called with neither stages nor behaviors.
    #[error("pipeline has no stages and no behaviors")]
    EmptyPipeline,

    /// A property key was empty or whitespace.
    #[error("invalid property key: {key:?}")]
    InvalidKey {
        /// The offending key.
        key: String,
    },

    /// A property value was null.
    #[error("null value for property key {key:?}")]
    NullValue {
        /// The key the null was written under.
        key: String,
    },

    /// Any other failure, type mismatches at the erased stage boundary
    /// included.
    #[error("{message}")]
    Internal {
        /// Short human-readable message.
        message: String,
        /// Underlying cause, when one exists.
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },
}

impl PipelineError {
    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error wrapping an underlying cause.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Create a validation error.
    pub fn validation(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create a rejection carrying the refusing policy's name.
    pub fn rejected(policy: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::Rejected {
            policy: policy.into(),
            retry_after,
        }
    }

    /// Create a retry-exhausted error wrapping the final attempt's error.
    #[must_use]
    pub fn retry_exhausted(retries: usize, source: PipelineError) -> Self {
        Self::RetryExhausted {
            retries,
            source: Box::new(source),
        }
    }

    /// Create a dead-letter error wrapping the original failure.
    pub fn dead_letter(reason: impl Into<String>, source: PipelineError) -> Self {
        Self::DeadLetter {
            reason: reason.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error is an admission rejection rather than failed work.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

impl From<ResilienceError> for PipelineError {
    fn from(error: ResilienceError) -> Self {
        match error {
            ResilienceError::Timeout { duration } => Self::Timeout {
                duration,
                stage: None,
            },
            ResilienceError::CircuitOpen {
                name, retry_after, ..
            } => Self::rejected(name, retry_after),
            ResilienceError::BulkheadFull { name, .. } => Self::rejected(name, None),
            ResilienceError::RateLimited { name, retry_after } => {
                Self::rejected(name, retry_after)
            }
            ResilienceError::RetryExhausted {
                retries,
                last_error,
            } => Self::retry_exhausted(retries, (*last_error).into()),
            ResilienceError::Cancelled => Self::Cancelled,
            ResilienceError::PolicyNotFound { name } => {
                Self::internal(format!("policy not found: {name}"))
            }
            ResilienceError::Config(err) => Self::internal_with_source("invalid policy configuration", err),
            ResilienceError::Application {
                message, source, ..
            } => Self::Internal {
                message,
                source,
            },
        }
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
