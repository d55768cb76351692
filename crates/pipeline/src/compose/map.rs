//! Output-mapping wrapper.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::pipeline::Pipeline;

/// Runs the inner pipeline, then applies a synchronous function to its
/// output. See [`PipelineExt::map`](crate::pipeline::PipelineExt::map).
pub struct MapPipeline<P, F, Out, Mapped> {
    name: String,
    inner: P,
    f: F,
    _marker: PhantomData<fn(Out) -> Mapped>,
}

impl<P, F, Out, Mapped> MapPipeline<P, F, Out, Mapped> {
    /// Wrap `inner` with a post-map.
    pub fn new<In>(inner: P, f: F) -> Self
    where
        P: Pipeline<In, Out>,
        F: Fn(Out) -> Mapped + Send + Sync,
        In: Send + 'static,
        Out: Send + 'static,
        Mapped: Send + 'static,
    {
        Self {
            name: format!("{} -> Map", inner.name()),
            inner,
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<In, Out, Mapped, P, F> Pipeline<In, Mapped> for MapPipeline<P, F, Out, Mapped>
where
    P: Pipeline<In, Out>,
    F: Fn(Out) -> Mapped + Send + Sync,
    In: Send + 'static,
    Out: Send + 'static,
    Mapped: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_with_context(
        &self,
        input: In,
        ctx: Arc<PipelineContext>,
    ) -> PipelineResult<Mapped> {
        let out = self.inner.execute_with_context(input, ctx).await?;
        Ok((self.f)(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pipeline_fn;

    #[tokio::test]
    async fn maps_the_inner_output() {
        let pipeline = MapPipeline::new(
            pipeline_fn("Parse", |s: String| async move {
                s.parse::<i32>()
                    .map_err(|e| crate::error::PipelineError::internal_with_source("parse", e))
            }),
            |x| x * 2,
        );
        assert_eq!(pipeline.name(), "Parse -> Map");
        assert_eq!(pipeline.execute("21".into()).await.unwrap(), 42);
    }
}
