//! Sequential composition wrapper.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::pipeline::Pipeline;

/// Runs the first pipeline, then feeds its output into the second on the
/// same context. See [`PipelineExt::then`](crate::pipeline::PipelineExt::then).
pub struct ThenPipeline<P1, P2, Mid> {
    name: String,
    first: P1,
    second: P2,
    _marker: PhantomData<fn() -> Mid>,
}

impl<P1, P2, Mid> ThenPipeline<P1, P2, Mid> {
    /// Chain `first` into `second`.
    pub fn new<In, Out>(first: P1, second: P2) -> Self
    where
        P1: Pipeline<In, Mid>,
        P2: Pipeline<Mid, Out>,
        In: Send + 'static,
        Mid: Send + 'static,
        Out: Send + 'static,
    {
        Self {
            name: format!("{} -> {}", first.name(), second.name()),
            first,
            second,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<In, Mid, Out, P1, P2> Pipeline<In, Out> for ThenPipeline<P1, P2, Mid>
where
    P1: Pipeline<In, Mid>,
    P2: Pipeline<Mid, Out>,
    In: Send + 'static,
    Mid: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_with_context(
        &self,
        input: In,
        ctx: Arc<PipelineContext>,
    ) -> PipelineResult<Out> {
        let mid = self.first.execute_with_context(input, Arc::clone(&ctx)).await?;
        self.second.execute_with_context(mid, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pipeline_fn;

    #[tokio::test]
    async fn chains_two_pipelines_on_one_context() {
        let first = pipeline_fn("AddOne", |x: i32| async move { Ok(x + 1) });
        let second = pipeline_fn("Double", |x: i32| async move { Ok(x * 2) });
        let chained = ThenPipeline::new(first, second);

        assert_eq!(chained.name(), "AddOne -> Double");
        assert_eq!(chained.execute(20).await.unwrap(), 42);
    }
}
