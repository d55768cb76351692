//! The staged pipeline executor.
//!
//! One execution runs: cache check, admission, before-execution
//! interceptors, the behavior chain terminating in stage iteration,
//! after-execution interceptors, cache insert. Errors flow through
//! `on_error` interceptors, the registered error handler, then the
//! configured error strategy.
//!
//! Stages are stored type-erased; the typed builder guarantees adjacent
//! stage types line up at insertion, so a runtime downcast mismatch is a
//! defect surfaced as [`PipelineError::Internal`] naming the stage.

use async_trait::async_trait;
use std::any::type_name;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::warn;

use conduit_core::keys;

use crate::behavior::{
    AnyValue, Behavior, BehaviorContribution, Next, RetryBehavior, TimeoutBehavior,
    resolve_order,
};
use crate::cache::PipelineCache;
use crate::config::{ErrorStrategy, PipelineConfiguration};
use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::interceptor::Interceptor;
use crate::metadata::PipelineMetadata;
use crate::metrics::{MetricSnapshot, MetricsTracker};
use crate::pipeline::Pipeline;
use crate::stage::Stage;

/// Type-erased stage stored by the executor.
#[async_trait]
pub(crate) trait ErasedStage: Send + Sync {
    fn name(&self) -> &str;
    async fn process_erased(
        &self,
        input: AnyValue,
        ctx: &PipelineContext,
    ) -> PipelineResult<AnyValue>;
}

pub(crate) struct ErasedStageAdapter<S, In, Out> {
    stage: S,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<S, In, Out> ErasedStageAdapter<S, In, Out>
where
    S: Stage<In, Out>,
    In: Send + 'static,
    Out: Send + 'static,
{
    pub(crate) fn new(stage: S) -> Self {
        Self {
            stage,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<S, In, Out> ErasedStage for ErasedStageAdapter<S, In, Out>
where
    S: Stage<In, Out>,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        self.stage.name()
    }

    async fn process_erased(
        &self,
        input: AnyValue,
        ctx: &PipelineContext,
    ) -> PipelineResult<AnyValue> {
        let input = input.downcast::<In>().map_err(|_| {
            PipelineError::internal(format!(
                "stage '{}' expected input type {}",
                self.stage.name(),
                type_name::<In>()
            ))
        })?;
        let out = self.stage.process(*input, ctx).await?;
        Ok(Box::new(out))
    }
}

/// Handler invoked when interceptors fail to absorb an error.
pub type ErrorHandler<Out> =
    Arc<dyn Fn(&PipelineError, &PipelineContext) -> Option<Out> + Send + Sync>;

/// A built, staged pipeline.
///
/// `In: Clone` because behaviors may re-run the stage chain (retry);
/// `Out: Clone` because cache hits and the continue strategy return owned
/// values.
pub struct ExecutorPipeline<In, Out> {
    pub(crate) metadata: PipelineMetadata,
    pub(crate) config: PipelineConfiguration,
    pub(crate) stages: Vec<Arc<dyn ErasedStage>>,
    /// Sorted by ascending priority, stable in registration order.
    pub(crate) interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) contributions: Vec<BehaviorContribution>,
    pub(crate) error_handler: Option<ErrorHandler<Out>>,
    pub(crate) continue_default: Option<Out>,
    pub(crate) cache: Option<PipelineCache<Out>>,
    pub(crate) cache_key: Option<Arc<dyn Fn(&In) -> String + Send + Sync>>,
    pub(crate) semaphore: Option<Arc<Semaphore>>,
    pub(crate) metrics: MetricsTracker,
}

impl<In, Out> ExecutorPipeline<In, Out>
where
    In: Clone + Send + Sync + 'static,
    Out: Clone + Send + Sync + 'static,
{
    /// Pipeline metadata.
    #[must_use]
    pub fn metadata(&self) -> &PipelineMetadata {
        &self.metadata
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfiguration {
        &self.config
    }

    /// Register an interceptor. Registration is append-only and must
    /// happen before the first execution.
    #[must_use]
    pub fn add_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self.interceptors = crate::interceptor::sort_by_priority(self.interceptors);
        self
    }

    /// Register a behavior contribution.
    #[must_use]
    pub fn add_behavior(mut self, contribution: BehaviorContribution) -> Self {
        self.contributions.push(contribution);
        self
    }

    /// Register the handler consulted after interceptors fail to absorb an
    /// error. Returning `Some` makes that value the execution's result.
    #[must_use]
    pub fn on_error(
        mut self,
        handler: impl Fn(&PipelineError, &PipelineContext) -> Option<Out> + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Set the result returned by the `Continue` error strategy.
    #[must_use]
    pub fn continue_with(mut self, default: Out) -> Self {
        self.continue_default = Some(default);
        self
    }

    /// Execution metrics snapshots, keyed by `pipeline` and
    /// `stage.{name}`.
    #[must_use]
    pub fn metrics(&self) -> std::collections::HashMap<String, MetricSnapshot> {
        self.metrics.all_metrics()
    }

    async fn run_protected(
        &self,
        input: In,
        ctx: &Arc<PipelineContext>,
    ) -> PipelineResult<Out> {
        for interceptor in &self.interceptors {
            interceptor.before_execution(ctx).await?;
        }

        // Configuration-derived decorators wrap the registered behaviors:
        // the retry decorator is outermost so it re-runs timed-out chains.
        let mut active: Vec<Arc<dyn Behavior>> = Vec::new();
        if self.config.max_retries > 0 {
            active.push(Arc::new(RetryBehavior::fixed(
                self.config.max_retries,
                self.config.retry_delay,
            )));
        }
        if let Some(timeout) = self.config.default_timeout {
            active.push(Arc::new(TimeoutBehavior::new(timeout)));
        }
        active.extend(resolve_order(&self.contributions, ctx));

        let terminal = move |chain_ctx| {
            let seed = input.clone();
            Box::pin(self.iterate_stages(seed, chain_ctx)) as futures::future::BoxFuture<'_, _>
        };
        let value = Next::chain(&active, &terminal)
            .proceed(Arc::clone(ctx))
            .await?;
        let value = value.downcast::<Out>().map_err(|_| {
            PipelineError::internal(format!(
                "pipeline '{}' produced an unexpected output type (expected {})",
                self.metadata.name,
                type_name::<Out>()
            ))
        })?;

        for interceptor in &self.interceptors {
            interceptor.after_execution(ctx).await?;
        }
        Ok(*value)
    }

    async fn iterate_stages(
        &self,
        input: In,
        ctx: Arc<PipelineContext>,
    ) -> PipelineResult<AnyValue> {
        let mut value: AnyValue = Box::new(input);
        for (index, stage) in self.stages.iter().enumerate() {
            ctx.check_cancelled()?;
            for interceptor in &self.interceptors {
                interceptor.before_stage(&ctx, stage.name()).await?;
            }
            ctx.set_current_stage(stage.name());

            let started = Instant::now();
            let result = stage.process_erased(value, &ctx).await;
            if self.config.metrics_enabled {
                self.metrics.record(
                    format!("stage.{}", stage.name()),
                    started.elapsed(),
                    result.is_ok(),
                );
            }
            value = result?;

            for interceptor in &self.interceptors {
                interceptor.after_stage(&ctx, stage.name()).await?;
            }
            ctx.mark_stage_completed(index);
        }
        Ok(value)
    }

    async fn handle_error(
        &self,
        error: PipelineError,
        ctx: &Arc<PipelineContext>,
        cache_key: Option<&str>,
    ) -> PipelineResult<Out> {
        ctx.set_exception(error.clone());

        // First interceptor to absorb wins; the context's result slot
        // becomes the output.
        for interceptor in &self.interceptors {
            if interceptor.on_error(ctx, &error).await {
                let Some(value) = ctx.take_result::<Out>() else {
                    return Err(PipelineError::internal(format!(
                        "interceptor '{}' absorbed the error without setting a result",
                        interceptor.name()
                    )));
                };
                self.store_in_cache(cache_key, &value);
                ctx.mark_ended();
                return Ok(value);
            }
        }

        if let Some(handler) = &self.error_handler
            && let Some(value) = handler(&error, ctx)
        {
            ctx.mark_ended();
            return Ok(value);
        }

        match self.config.error_strategy {
            ErrorStrategy::FailFast | ErrorStrategy::Custom | ErrorStrategy::Retry => Err(error),
            ErrorStrategy::Continue => match &self.continue_default {
                Some(default) => {
                    warn!(
                        pipeline = %self.metadata.name,
                        error = %error,
                        "continuing with default result after failure"
                    );
                    ctx.mark_ended();
                    Ok(default.clone())
                }
                None => {
                    warn!(
                        pipeline = %self.metadata.name,
                        "continue strategy has no default result; propagating"
                    );
                    Err(error)
                }
            },
            ErrorStrategy::DeadLetter => {
                let reason = error.to_string();
                ctx.set_property(keys::DEAD_LETTER, true)?;
                ctx.set_property(keys::DEAD_LETTER_REASON, reason.clone())?;
                Err(PipelineError::dead_letter(reason, error))
            }
        }
    }

    fn store_in_cache(&self, cache_key: Option<&str>, value: &Out) {
        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.insert(key, value.clone(), self.config.default_cache_duration);
        }
    }
}

#[async_trait]
impl<In, Out> Pipeline<In, Out> for ExecutorPipeline<In, Out>
where
    In: Clone + Send + Sync + 'static,
    Out: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.metadata.name
    }

    async fn execute(&self, input: In) -> PipelineResult<Out> {
        let ctx = Arc::new(PipelineContext::new(
            self.metadata.id,
            self.metadata.name.clone(),
        ));
        self.execute_with_context(input, ctx).await
    }

    async fn execute_cancellable(
        &self,
        input: In,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> PipelineResult<Out> {
        let ctx = Arc::new(
            PipelineContext::new(self.metadata.id, self.metadata.name.clone())
                .with_parent_cancellation(cancel),
        );
        self.execute_with_context(input, ctx).await
    }

    async fn execute_with_context(
        &self,
        input: In,
        ctx: Arc<PipelineContext>,
    ) -> PipelineResult<Out> {
        ctx.mark_started();
        ctx.set_input(input.clone());

        let cache_key = match (&self.cache, &self.cache_key) {
            (Some(_), Some(key_fn)) => Some(key_fn(&input)),
            _ => None,
        };
        if let (Some(cache), Some(key)) = (&self.cache, cache_key.as_deref()) {
            if let Some(hit) = cache.get(key) {
                ctx.mark_ended();
                return Ok(hit);
            }
        }

        let _permit = match &self.semaphore {
            Some(semaphore) => Some(tokio::select! {
                () = ctx.cancellation_token().cancelled() => {
                    return Err(PipelineError::Cancelled);
                }
                permit = Arc::clone(semaphore).acquire_owned() => {
                    permit.map_err(|_| PipelineError::Cancelled)?
                }
            }),
            None => None,
        };

        let started = Instant::now();
        match self.run_protected(input, &ctx).await {
            Ok(value) => {
                if self.config.metrics_enabled {
                    self.metrics.record("pipeline", started.elapsed(), true);
                }
                self.store_in_cache(cache_key.as_deref(), &value);
                ctx.mark_ended();
                ctx.set_result(value.clone());
                Ok(value)
            }
            Err(error) => {
                if self.config.metrics_enabled {
                    self.metrics.record("pipeline", started.elapsed(), false);
                }
                self.handle_error(error, &ctx, cache_key.as_deref()).await
            }
        }
    }
}
