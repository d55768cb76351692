//! Typed transformation stages.
//!
//! A stage is one named transformation `In -> Out`. Stages compose
//! sequentially with [`StageExt::and_then`], post-process with
//! [`StageExt::map`], and gate with [`StageExt::filter`]; decorating stages
//! live in [`crate::stages`].

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::PipelineContext;
use crate::error::PipelineResult;

/// One typed transformation step.
#[async_trait]
pub trait Stage<In, Out>: Send + Sync
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Stage name, used in logs, errors, and context progress.
    fn name(&self) -> &str;

    /// Transform `input`, reading and writing execution state on `ctx`.
    async fn process(&self, input: In, ctx: &PipelineContext) -> PipelineResult<Out>;
}

#[async_trait]
impl<In, Out, S> Stage<In, Out> for Arc<S>
where
    S: Stage<In, Out> + ?Sized,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn process(&self, input: In, ctx: &PipelineContext) -> PipelineResult<Out> {
        (**self).process(input, ctx).await
    }
}

/// Build a stage from an async closure.
pub fn stage_fn<In, Out, F, Fut>(name: impl Into<String>, f: F) -> FnStage<F, In, Out>
where
    F: Fn(In) -> Fut + Send + Sync,
    Fut: Future<Output = PipelineResult<Out>> + Send,
    In: Send + 'static,
    Out: Send + 'static,
{
    FnStage {
        name: name.into(),
        f,
        _marker: PhantomData,
    }
}

/// Stage backed by an async closure. See [`stage_fn`].
pub struct FnStage<F, In, Out> {
    name: String,
    f: F,
    _marker: PhantomData<fn(In) -> Out>,
}

#[async_trait]
impl<In, Out, F, Fut> Stage<In, Out> for FnStage<F, In, Out>
where
    F: Fn(In) -> Fut + Send + Sync,
    Fut: Future<Output = PipelineResult<Out>> + Send,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, input: In, _ctx: &PipelineContext) -> PipelineResult<Out> {
        (self.f)(input).await
    }
}

/// Combinators over stages.
pub trait StageExt<In, Out>: Stage<In, Out> + Sized
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Run `self`, then feed its output into `next` on the same context.
    fn and_then<Next, S>(self, next: S) -> AndThenStage<Self, S, Out>
    where
        S: Stage<Out, Next>,
        Next: Send + 'static,
    {
        let name = format!("{} -> {}", self.name(), next.name());
        AndThenStage {
            name,
            first: self,
            second: next,
            _marker: PhantomData,
        }
    }

    /// Post-map the output with a synchronous function.
    fn map<Mapped, F>(self, f: F) -> MapStage<Self, F, Out, Mapped>
    where
        F: Fn(Out) -> Mapped + Send + Sync,
        Mapped: Send + 'static,
    {
        let name = format!("{} -> Map", self.name());
        MapStage {
            name,
            inner: self,
            f,
            _marker: PhantomData,
        }
    }

    /// Gate the output on a predicate: `Some(out)` when it holds, `None`
    /// otherwise. A refused value is not an error.
    fn filter<F>(self, predicate: F) -> FilterStage<Self, F>
    where
        F: Fn(&Out) -> bool + Send + Sync,
    {
        let name = format!("{} -> Filter", self.name());
        FilterStage {
            name,
            inner: self,
            predicate,
        }
    }
}

impl<S, In, Out> StageExt<In, Out> for S
where
    S: Stage<In, Out>,
    In: Send + 'static,
    Out: Send + 'static,
{
}

/// Sequential composition of two stages. See [`StageExt::and_then`].
pub struct AndThenStage<A, B, Mid> {
    name: String,
    first: A,
    second: B,
    _marker: PhantomData<fn() -> Mid>,
}

#[async_trait]
impl<In, Mid, Out, A, B> Stage<In, Out> for AndThenStage<A, B, Mid>
where
    A: Stage<In, Mid>,
    B: Stage<Mid, Out>,
    In: Send + 'static,
    Mid: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, input: In, ctx: &PipelineContext) -> PipelineResult<Out> {
        let mid = self.first.process(input, ctx).await?;
        self.second.process(mid, ctx).await
    }
}

/// Output-mapping stage. See [`StageExt::map`].
pub struct MapStage<S, F, Out, Mapped> {
    name: String,
    inner: S,
    f: F,
    _marker: PhantomData<fn(Out) -> Mapped>,
}

#[async_trait]
impl<In, Out, Mapped, S, F> Stage<In, Mapped> for MapStage<S, F, Out, Mapped>
where
    S: Stage<In, Out>,
    F: Fn(Out) -> Mapped + Send + Sync,
    In: Send + 'static,
    Out: Send + 'static,
    Mapped: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, input: In, ctx: &PipelineContext) -> PipelineResult<Mapped> {
        let out = self.inner.process(input, ctx).await?;
        Ok((self.f)(out))
    }
}

/// Predicate-gating stage. See [`StageExt::filter`].
pub struct FilterStage<S, F> {
    name: String,
    inner: S,
    predicate: F,
}

#[async_trait]
impl<In, Out, S, F> Stage<In, Option<Out>> for FilterStage<S, F>
where
    S: Stage<In, Out>,
    F: Fn(&Out) -> bool + Send + Sync,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, input: In, ctx: &PipelineContext) -> PipelineResult<Option<Out>> {
        let out = self.inner.process(input, ctx).await?;
        if (self.predicate)(&out) {
            Ok(Some(out))
        } else {
            Ok(None)
        }
    }
}
