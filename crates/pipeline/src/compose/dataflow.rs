//! Bounded-queue parallel variant.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use conduit_core::keys;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Pipeline;

/// Parallel fan-out through an explicit bounded work queue.
///
/// The producer feeds elements into a channel of capacity
/// `bounded_capacity` and blocks while it is full; `workers` consumer
/// tasks drain it, each element on its own child context. Order is
/// restored when `preserve_order` is set. After a run the parent context
/// carries `DataflowPipeline.ProcessedCount`.
pub struct DataflowParallelPipeline<P> {
    name: String,
    inner: Arc<P>,
    bounded_capacity: usize,
    workers: usize,
    preserve_order: bool,
}

impl<P> DataflowParallelPipeline<P> {
    /// Create a dataflow fan-out with the given queue capacity and worker
    /// count.
    pub fn new<In, Out>(inner: P, bounded_capacity: usize, workers: usize) -> Self
    where
        P: Pipeline<In, Out>,
        In: Send + 'static,
        Out: Send + 'static,
    {
        Self {
            name: format!("Dataflow({})", inner.name()),
            inner: Arc::new(inner),
            bounded_capacity: bounded_capacity.max(1),
            workers: workers.max(1),
            preserve_order: false,
        }
    }

    /// Restore input order in the result list.
    #[must_use]
    pub fn preserving_order(mut self) -> Self {
        self.preserve_order = true;
        self
    }
}

#[async_trait]
impl<In, Out, P> Pipeline<Vec<In>, Vec<Out>> for DataflowParallelPipeline<P>
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
        let total = inputs.len();
        let (work_tx, work_rx) = mpsc::channel::<(usize, In)>(self.bounded_capacity);
        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(usize, PipelineResult<Out>)>();

        let workers: Vec<_> = (0..self.workers)
            .map(|_| {
                let work_rx = Arc::clone(&work_rx);
                let done_tx = done_tx.clone();
                let inner = Arc::clone(&self.inner);
                let parent = Arc::clone(&ctx);
                tokio::spawn(async move {
                    loop {
                        let item = { work_rx.lock().await.recv().await };
                        let Some((index, input)) = item else { break };
                        let child = Arc::new(parent.create_child_context());
                        let result = match child.check_cancelled().and_then(|()| {
                            child.set_property(keys::PARALLEL_INDEX, index)
                        }) {
                            Ok(()) => inner.execute_with_context(input, child).await,
                            Err(error) => Err(error),
                        };
                        if done_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();
        drop(done_tx);

        // Producer: blocks here whenever the bounded queue is full.
        for item in inputs.into_iter().enumerate() {
            if work_tx.send(item).await.is_err() {
                break;
            }
        }
        drop(work_tx);

        let mut indexed = Vec::with_capacity(total);
        while let Some((index, result)) = done_rx.recv().await {
            match result {
                Ok(out) => indexed.push((index, out)),
                Err(error) => {
                    for worker in &workers {
                        worker.abort();
                    }
                    return Err(error);
                }
            }
        }
        for worker in workers {
            worker.await.map_err(|join_error| {
                PipelineError::internal_with_source("dataflow worker panicked", join_error)
            })?;
        }

        if self.preserve_order {
            indexed.sort_by_key(|(index, _)| *index);
        }
        ctx.set_property(keys::DATAFLOW_PROCESSED_COUNT, indexed.len())?;
        Ok(indexed.into_iter().map(|(_, out)| out).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pipeline_fn;
    use conduit_core::PipelineId;
    use std::time::Duration;

    fn double() -> impl Pipeline<i32, i32> + use<> {
        pipeline_fn("Double", |x: i32| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(x * 2)
        })
    }

    #[tokio::test]
    async fn processes_everything_through_the_bounded_queue() {
        let pipeline = DataflowParallelPipeline::new(double(), 2, 3);
        let mut results = pipeline.execute((0..20).collect()).await.unwrap();
        results.sort_unstable();
        assert_eq!(results, (0..20).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn preserve_order_restores_input_order() {
        let pipeline = DataflowParallelPipeline::new(double(), 2, 4).preserving_order();
        let results = pipeline.execute(vec![5, 3, 8, 1]).await.unwrap();
        assert_eq!(results, vec![10, 6, 16, 2]);
    }

    #[tokio::test]
    async fn records_processed_count_on_parent_context() {
        let pipeline = DataflowParallelPipeline::new(double(), 4, 2);
        let ctx = Arc::new(PipelineContext::new(PipelineId::v4(), "parent"));
        pipeline
            .execute_with_context(vec![1, 2, 3], Arc::clone(&ctx))
            .await
            .unwrap();
        assert_eq!(ctx.get_value(keys::DATAFLOW_PROCESSED_COUNT, 0), 3);
    }

    #[tokio::test]
    async fn element_failure_fails_the_run() {
        let pipeline = DataflowParallelPipeline::new(
            pipeline_fn("FailOn3", |x: i32| async move {
                if x == 3 {
                    Err(PipelineError::internal("bad element"))
                } else {
                    Ok(x)
                }
            }),
            2,
            2,
        );
        let err = pipeline.execute(vec![1, 2, 3, 4]).await.unwrap_err();
        assert!(err.to_string().contains("bad element"));
    }
}
