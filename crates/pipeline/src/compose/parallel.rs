//! Parallel fan-out over a sequence of inputs.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use conduit_core::keys;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Pipeline;

/// Runs the inner pipeline over every element of an input list.
///
/// Concurrency is bounded by a semaphore (CPU count by default); each
/// element executes on its own child context annotated with
/// `ParallelPipeline.Index` and `ParallelPipeline.ThreadId`. In ordered
/// mode output index `i` corresponds to input index `i`; in unordered mode
/// results stream in completion order. The first failure aborts the
/// remaining elements.
pub struct ParallelPipeline<P> {
    name: String,
    inner: Arc<P>,
    max_concurrency: usize,
    ordered: bool,
}

impl<P> ParallelPipeline<P> {
    /// Order-preserving fan-out. `max_concurrency = 0` uses the CPU count.
    pub fn ordered<In, Out>(inner: P, max_concurrency: usize) -> Self
    where
        P: Pipeline<In, Out>,
        In: Send + 'static,
        Out: Send + 'static,
    {
        Self::build(inner, max_concurrency, true)
    }

    /// Completion-order fan-out.
    pub fn unordered<In, Out>(inner: P, max_concurrency: usize) -> Self
    where
        P: Pipeline<In, Out>,
        In: Send + 'static,
        Out: Send + 'static,
    {
        Self::build(inner, max_concurrency, false)
    }

    fn build<In, Out>(inner: P, max_concurrency: usize, ordered: bool) -> Self
    where
        P: Pipeline<In, Out>,
        In: Send + 'static,
        Out: Send + 'static,
    {
        let max_concurrency = if max_concurrency == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZero::get)
        } else {
            max_concurrency
        };
        Self {
            name: format!("Parallel({})", inner.name()),
            inner: Arc::new(inner),
            max_concurrency,
            ordered,
        }
    }

    fn spawn_elements<In, Out>(
        &self,
        inputs: Vec<In>,
        ctx: &Arc<PipelineContext>,
    ) -> Vec<JoinHandle<PipelineResult<Out>>>
    where
        P: Pipeline<In, Out> + 'static,
        In: Send + 'static,
        Out: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| {
                let inner = Arc::clone(&self.inner);
                let semaphore = Arc::clone(&semaphore);
                let child = Arc::new(ctx.create_child_context());
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| PipelineError::Cancelled)?;
                    child.check_cancelled()?;
                    child.set_property(keys::PARALLEL_INDEX, index)?;
                    child.set_property(
                        keys::PARALLEL_THREAD_ID,
                        format!("{:?}", std::thread::current().id()),
                    )?;
                    inner.execute_with_context(input, child).await
                })
            })
            .collect()
    }
}

#[async_trait]
impl<In, Out, P> Pipeline<Vec<In>, Vec<Out>> for ParallelPipeline<P>
where
    P: Pipeline<In, Out> + 'static,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_with_context(
        &self,
        inputs: Vec<In>,
        ctx: Arc<PipelineContext>,
    ) -> PipelineResult<Vec<Out>> {
        let handles = self.spawn_elements(inputs, &ctx);

        if self.ordered {
            let mut results = Vec::with_capacity(handles.len());
            let mut handles = handles.into_iter();
            while let Some(handle) = handles.next() {
                match handle.await {
                    Ok(Ok(out)) => results.push(out),
                    Ok(Err(error)) => {
                        for remaining in handles {
                            remaining.abort();
                        }
                        return Err(error);
                    }
                    Err(join_error) => {
                        for remaining in handles {
                            remaining.abort();
                        }
                        return Err(PipelineError::internal_with_source(
                            "parallel element panicked",
                            join_error,
                        ));
                    }
                }
            }
            Ok(results)
        } else {
            let mut pending: FuturesUnordered<_> = handles.into_iter().collect();
            let mut results = Vec::with_capacity(pending.len());
            while let Some(joined) = pending.next().await {
                match joined {
                    Ok(Ok(out)) => results.push(out),
                    Ok(Err(error)) => {
                        for remaining in &pending {
                            remaining.abort();
                        }
                        return Err(error);
                    }
                    Err(join_error) => {
                        for remaining in &pending {
                            remaining.abort();
                        }
                        return Err(PipelineError::internal_with_source(
                            "parallel element panicked",
                            join_error,
                        ));
                    }
                }
            }
            Ok(results)
        }
    }
}
