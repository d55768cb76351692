//! The pipeline contract and fluent combinators.
//!
//! The core trait exposes only execution; combinators live in
//! [`PipelineExt`] and return new wrapper pipelines, leaving the source
//! usable. Wrap a pipeline in [`Arc`] (which also implements
//! [`Pipeline`]) to reuse one instance across several compositions.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use conduit_core::PipelineId;

use crate::compose::{
    BranchPipeline, BranchPredicate, CachingPipeline, FilterPipeline, MapPipeline,
    ParallelPipeline, ThenPipeline, WithRetryPipeline, WithTimeoutPipeline,
};
use crate::context::PipelineContext;
use crate::error::PipelineResult;

/// An executable pipeline from `In` to `Out`.
#[async_trait]
pub trait Pipeline<In, Out>: Send + Sync
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Pipeline name, used for context derivation, logs, and errors.
    fn name(&self) -> &str;

    /// Execute with a caller-provided context.
    async fn execute_with_context(
        &self,
        input: In,
        ctx: Arc<PipelineContext>,
    ) -> PipelineResult<Out>;

    /// Execute with a fresh context.
    async fn execute(&self, input: In) -> PipelineResult<Out> {
        let ctx = Arc::new(PipelineContext::new(PipelineId::v4(), self.name().to_owned()));
        self.execute_with_context(input, ctx).await
    }

    /// Execute with a fresh context linked to the caller's cancellation.
    async fn execute_cancellable(
        &self,
        input: In,
        cancel: &CancellationToken,
    ) -> PipelineResult<Out> {
        let ctx = Arc::new(
            PipelineContext::new(PipelineId::v4(), self.name().to_owned())
                .with_parent_cancellation(cancel),
        );
        self.execute_with_context(input, ctx).await
    }
}

#[async_trait]
impl<In, Out, P> Pipeline<In, Out> for Arc<P>
where
    P: Pipeline<In, Out> + ?Sized,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn execute_with_context(
        &self,
        input: In,
        ctx: Arc<PipelineContext>,
    ) -> PipelineResult<Out> {
        (**self).execute_with_context(input, ctx).await
    }
}

/// Build a pipeline from an async closure.
pub fn pipeline_fn<In, Out, F, Fut>(name: impl Into<String>, f: F) -> FnPipeline<F, In, Out>
where
    F: Fn(In) -> Fut + Send + Sync,
    Fut: Future<Output = PipelineResult<Out>> + Send,
    In: Send + 'static,
    Out: Send + 'static,
{
    FnPipeline {
        name: name.into(),
        f,
        _marker: PhantomData,
    }
}

/// Pipeline backed by an async closure. See [`pipeline_fn`].
pub struct FnPipeline<F, In, Out> {
    name: String,
    f: F,
    _marker: PhantomData<fn(In) -> Out>,
}

#[async_trait]
impl<In, Out, F, Fut> Pipeline<In, Out> for FnPipeline<F, In, Out>
where
    F: Fn(In) -> Fut + Send + Sync,
    Fut: Future<Output = PipelineResult<Out>> + Send,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_with_context(
        &self,
        input: In,
        _ctx: Arc<PipelineContext>,
    ) -> PipelineResult<Out> {
        (self.f)(input).await
    }
}

/// Fluent combinators over pipelines.
///
/// Every combinator consumes `self` and returns a new pipeline value; wrap
/// the source in [`Arc`] first when it must stay reusable.
pub trait PipelineExt<In, Out>: Pipeline<In, Out> + Sized
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Post-map the output with a synchronous function.
    fn map<Mapped, F>(self, f: F) -> MapPipeline<Self, F, Out, Mapped>
    where
        F: Fn(Out) -> Mapped + Send + Sync,
        Mapped: Send + 'static,
    {
        MapPipeline::new(self, f)
    }

    /// Feed this pipeline's output into `next`, sharing the context.
    fn then<Next, P>(self, next: P) -> ThenPipeline<Self, P, Out>
    where
        P: Pipeline<Out, Next>,
        Next: Send + 'static,
    {
        ThenPipeline::new(self, next)
    }

    /// Gate the output on a predicate; a refused value becomes `None` and
    /// tags the context `Filtered = true`.
    fn filter<F>(self, predicate: F) -> FilterPipeline<Self, F>
    where
        F: Fn(&Out) -> bool + Send + Sync,
    {
        FilterPipeline::new(self, predicate)
    }

    /// Retry the whole pipeline up to `max_retries` times (beyond the one
    /// initial attempt) with a fixed delay between attempts.
    fn with_retry(self, max_retries: usize, delay: Duration) -> WithRetryPipeline<Self>
    where
        In: Clone + Sync,
    {
        WithRetryPipeline::new(self, max_retries, delay)
    }

    /// Race the whole pipeline against a deadline.
    fn with_timeout(self, duration: Duration) -> WithTimeoutPipeline<Self> {
        WithTimeoutPipeline::new(self, duration)
    }

    /// Cache outputs by key with at-most-one in-flight computation per
    /// key.
    fn with_cache<KeyF>(self, key: KeyF, ttl: Duration) -> CachingPipeline<Self, KeyF, Out>
    where
        KeyF: Fn(&In) -> String + Send + Sync,
        Out: Clone + Sync,
    {
        CachingPipeline::new(self, key, ttl)
    }

    /// Fan this pipeline out over a list of inputs, preserving input
    /// order.
    fn parallel(self, max_concurrency: usize) -> ParallelPipeline<Self> {
        ParallelPipeline::ordered(self, max_concurrency)
    }

    /// Route to `when_true` or `when_false` on a predicate over the input.
    fn branch<P1, P2, Pred, BranchOut>(
        self,
        predicate: Pred,
        when_true: P1,
        when_false: P2,
    ) -> ThenPipeline<Self, BranchPipeline<P1, P2, Pred>, Out>
    where
        Pred: BranchPredicate<Out>,
        P1: Pipeline<Out, BranchOut>,
        P2: Pipeline<Out, BranchOut>,
        BranchOut: Send + 'static,
        Out: Sync,
    {
        self.then(BranchPipeline::new(predicate, when_true, when_false))
    }
}

impl<P, In, Out> PipelineExt<In, Out> for P
where
    P: Pipeline<In, Out>,
    In: Send + 'static,
    Out: Send + 'static,
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pipeline_fn_executes_with_fresh_context() {
        let pipeline = pipeline_fn("Double", |x: i32| async move { Ok(x * 2) });
        assert_eq!(pipeline.name(), "Double");
        assert_eq!(pipeline.execute(21).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn cancelled_token_is_visible_to_the_context() {
        let pipeline = pipeline_fn("Check", |x: i32| async move { Ok(x) });
        let token = CancellationToken::new();
        token.cancel();

        // The pipeline itself ignores the token; the context must observe
        // it for cooperative stages.
        let ctx = Arc::new(
            PipelineContext::new(PipelineId::v4(), "Check").with_parent_cancellation(&token),
        );
        assert!(ctx.is_cancelled());
        assert_eq!(pipeline.execute_cancellable(1, &token).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn arc_wrapped_pipeline_is_reusable_across_compositions() {
        let base = Arc::new(pipeline_fn("Base", |x: i32| async move { Ok(x + 1) }));

        let doubled = Arc::clone(&base).map(|x| x * 2);
        let tripled = Arc::clone(&base).map(|x| x * 3);

        assert_eq!(doubled.execute(1).await.unwrap(), 4);
        assert_eq!(tripled.execute(1).await.unwrap(), 6);
        assert_eq!(base.execute(1).await.unwrap(), 2);
    }
}
