//! Lifecycle interceptors.
//!
//! Interceptors hook the executor around whole executions and individual
//! stages. All hooks are optional. Ordering is strictly ascending priority,
//! stable by registration order for ties, and the `after*` hooks use the
//! same order as the `before*` hooks (not reversed).

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use conduit_core::keys;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};

/// Hooks around pipeline execution.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Interceptor name, used in logs.
    fn name(&self) -> &str;

    /// Ordering priority; lower runs first.
    fn priority(&self) -> i32 {
        0
    }

    /// Runs before the behavior chain. An error here fails the execution.
    async fn before_execution(&self, _ctx: &PipelineContext) -> PipelineResult<()> {
        Ok(())
    }

    /// Runs after the stages complete, in the same order as
    /// `before_execution`.
    async fn after_execution(&self, _ctx: &PipelineContext) -> PipelineResult<()> {
        Ok(())
    }

    /// Inspect an execution error. Returning `true` absorbs it: the
    /// executor takes the context's result slot as the successful output
    /// and no further `on_error` hooks run.
    async fn on_error(&self, _ctx: &PipelineContext, _error: &PipelineError) -> bool {
        false
    }

    /// Runs before each stage.
    async fn before_stage(&self, _ctx: &PipelineContext, _stage: &str) -> PipelineResult<()> {
        Ok(())
    }

    /// Runs after each stage, in the same order as `before_stage`.
    async fn after_stage(&self, _ctx: &PipelineContext, _stage: &str) -> PipelineResult<()> {
        Ok(())
    }
}

/// Sort interceptors by ascending priority, stable in registration order.
#[must_use]
pub fn sort_by_priority(mut interceptors: Vec<Arc<dyn Interceptor>>) -> Vec<Arc<dyn Interceptor>> {
    interceptors.sort_by_key(|interceptor| interceptor.priority());
    interceptors
}

/// Structured start/finish/error logging around executions and stages.
pub struct TracingInterceptor {
    priority: i32,
}

impl TracingInterceptor {
    /// Create a tracing interceptor with priority `i32::MIN` so it brackets
    /// everything else.
    #[must_use]
    pub fn new() -> Self {
        Self {
            priority: i32::MIN,
        }
    }
}

impl Default for TracingInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Interceptor for TracingInterceptor {
    fn name(&self) -> &str {
        "Tracing"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn before_execution(&self, ctx: &PipelineContext) -> PipelineResult<()> {
        debug!(
            pipeline = %ctx.pipeline_name,
            context = %ctx.context_id,
            "execution starting"
        );
        Ok(())
    }

    async fn after_execution(&self, ctx: &PipelineContext) -> PipelineResult<()> {
        debug!(
            pipeline = %ctx.pipeline_name,
            context = %ctx.context_id,
            elapsed_ms = ctx.get_execution_duration().as_secs_f64() * 1000.0,
            "execution completed"
        );
        Ok(())
    }

    async fn on_error(&self, ctx: &PipelineContext, error: &PipelineError) -> bool {
        warn!(
            pipeline = %ctx.pipeline_name,
            context = %ctx.context_id,
            error = %error,
            "execution failed"
        );
        false
    }

    async fn before_stage(&self, ctx: &PipelineContext, stage: &str) -> PipelineResult<()> {
        debug!(pipeline = %ctx.pipeline_name, stage, "stage starting");
        Ok(())
    }

    async fn after_stage(&self, ctx: &PipelineContext, stage: &str) -> PipelineResult<()> {
        debug!(pipeline = %ctx.pipeline_name, stage, "stage completed");
        Ok(())
    }
}

/// Generic predicate validator over the execution context.
///
/// Runs before execution; a refused context records
/// `ValidationFailed = true` plus the error message under
/// `ValidationErrors` and fails with [`PipelineError::Validation`]. An
/// accepted one records `ValidationPassed = true`.
pub struct ValidationInterceptor {
    validator: Box<dyn Fn(&PipelineContext) -> Result<(), String> + Send + Sync>,
}

impl ValidationInterceptor {
    /// Create a validator from a predicate returning a refusal message.
    pub fn new(
        validator: impl Fn(&PipelineContext) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            validator: Box::new(validator),
        }
    }
}

#[async_trait]
impl Interceptor for ValidationInterceptor {
    fn name(&self) -> &str {
        "Validation"
    }

    fn priority(&self) -> i32 {
        // Validate before ordinary interceptors run.
        i32::MIN + 1
    }

    async fn before_execution(&self, ctx: &PipelineContext) -> PipelineResult<()> {
        match (self.validator)(ctx) {
            Ok(()) => {
                ctx.set_property(keys::VALIDATION_PASSED, true)?;
                Ok(())
            }
            Err(message) => {
                ctx.set_property(keys::VALIDATION_FAILED, true)?;
                ctx.set_property(keys::VALIDATION_ERRORS, vec![message.clone()])?;
                Err(PipelineError::validation(self.name(), message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::PipelineId;

    struct Named(i32);

    #[async_trait]
    impl Interceptor for Named {
        fn name(&self) -> &str {
            "named"
        }

        fn priority(&self) -> i32 {
            self.0
        }
    }

    #[test]
    fn sorting_is_stable_for_equal_priorities() {
        let a: Arc<dyn Interceptor> = Arc::new(Named(5));
        let b: Arc<dyn Interceptor> = Arc::new(Named(1));
        let c: Arc<dyn Interceptor> = Arc::new(Named(5));

        let sorted = sort_by_priority(vec![Arc::clone(&a), Arc::clone(&b), Arc::clone(&c)]);
        assert_eq!(sorted[0].priority(), 1);
        assert!(Arc::ptr_eq(&sorted[1], &a));
        assert!(Arc::ptr_eq(&sorted[2], &c));
    }

    #[tokio::test]
    async fn validation_interceptor_marks_context() {
        let ctx = PipelineContext::new(PipelineId::v4(), "test");
        let pass = ValidationInterceptor::new(|_| Ok(()));
        pass.before_execution(&ctx).await.unwrap();
        assert_eq!(ctx.get_value(keys::VALIDATION_PASSED, false), true);

        let ctx = PipelineContext::new(PipelineId::v4(), "test");
        let fail = ValidationInterceptor::new(|_| Err("missing CorrelationId".into()));
        let err = fail.before_execution(&ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation { .. }));
        assert_eq!(ctx.get_value(keys::VALIDATION_FAILED, false), true);
        assert_eq!(
            ctx.get_value::<Vec<String>>(keys::VALIDATION_ERRORS, Vec::new()),
            vec!["missing CorrelationId".to_owned()]
        );
    }
}
