//! Predicate-gating wrapper.

use async_trait::async_trait;
use std::sync::Arc;

use conduit_core::keys;

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::pipeline::Pipeline;

/// Runs the inner pipeline and gates its output on a predicate.
///
/// A refused output becomes `Ok(None)` and the context is tagged
/// `Filtered = true`; refusal is per execution and never an error. See
/// [`PipelineExt::filter`](crate::pipeline::PipelineExt::filter).
pub struct FilterPipeline<P, F> {
    name: String,
    inner: P,
    predicate: F,
}

impl<P, F> FilterPipeline<P, F> {
    /// Gate `inner` on `predicate`.
    pub fn new<In, Out>(inner: P, predicate: F) -> Self
    where
        P: Pipeline<In, Out>,
        F: Fn(&Out) -> bool + Send + Sync,
        In: Send + 'static,
        Out: Send + 'static,
    {
        Self {
            name: format!("{} -> Filter", inner.name()),
            inner,
            predicate,
        }
    }
}

#[async_trait]
impl<In, Out, P, F> Pipeline<In, Option<Out>> for FilterPipeline<P, F>
where
    P: Pipeline<In, Out>,
    F: Fn(&Out) -> bool + Send + Sync,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_with_context(
        &self,
        input: In,
        ctx: Arc<PipelineContext>,
    ) -> PipelineResult<Option<Out>> {
        let out = self.inner.execute_with_context(input, Arc::clone(&ctx)).await?;
        if (self.predicate)(&out) {
            Ok(Some(out))
        } else {
            ctx.set_property(keys::FILTERED, true)?;
            Ok(None)
        }
    }
}
