//! Whole-pipeline retry and timeout wrappers.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Pipeline;

/// Retries the whole inner pipeline on failure.
///
/// `max_retries` means retries in addition to the one initial attempt.
/// Rejections and cancellation are never retried. See
/// [`PipelineExt::with_retry`](crate::pipeline::PipelineExt::with_retry).
pub struct WithRetryPipeline<P> {
    name: String,
    inner: P,
    max_retries: usize,
    delay: Duration,
}

impl<P> WithRetryPipeline<P> {
    /// Wrap `inner` with up to `max_retries` retries at a fixed delay.
    pub fn new<In, Out>(inner: P, max_retries: usize, delay: Duration) -> Self
    where
        P: Pipeline<In, Out>,
        In: Send + 'static,
        Out: Send + 'static,
    {
        Self {
            name: format!("{} (Retry x{max_retries})", inner.name()),
            inner,
            max_retries,
            delay,
        }
    }
}

#[async_trait]
impl<In, Out, P> Pipeline<In, Out> for WithRetryPipeline<P>
where
    P: Pipeline<In, Out>,
    In: Clone + Send + Sync + 'static,
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
        let mut retries = 0usize;
        loop {
            match self
                .inner
                .execute_with_context(input.clone(), Arc::clone(&ctx))
                .await
            {
                Ok(out) => return Ok(out),
                Err(error) => {
                    let retryable = !matches!(
                        error,
                        PipelineError::Cancelled | PipelineError::Rejected { .. }
                    );
                    if !retryable {
                        return Err(error);
                    }
                    if retries >= self.max_retries {
                        return if self.max_retries == 0 {
                            Err(error)
                        } else {
                            Err(PipelineError::retry_exhausted(retries, error))
                        };
                    }
                    retries += 1;
                    debug!(
                        pipeline = %self.name,
                        retry = retries,
                        error = %error,
                        "retrying pipeline"
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

/// Races the whole inner pipeline against a deadline. See
/// [`PipelineExt::with_timeout`](crate::pipeline::PipelineExt::with_timeout).
pub struct WithTimeoutPipeline<P> {
    name: String,
    inner: P,
    duration: Duration,
}

impl<P> WithTimeoutPipeline<P> {
    /// Wrap `inner` with a deadline.
    pub fn new<In, Out>(inner: P, duration: Duration) -> Self
    where
        P: Pipeline<In, Out>,
        In: Send + 'static,
        Out: Send + 'static,
    {
        Self {
            name: format!("{} (Timeout: {}ms)", inner.name(), duration.as_millis()),
            inner,
            duration,
        }
    }
}

#[async_trait]
impl<In, Out, P> Pipeline<In, Out> for WithTimeoutPipeline<P>
where
    P: Pipeline<In, Out>,
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
    ) -> PipelineResult<Out> {
        match tokio::time::timeout(self.duration, self.inner.execute_with_context(input, ctx)).await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(PipelineError::Timeout {
                duration: self.duration,
                stage: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pipeline_fn;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_wrapper_reruns_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        let flaky = pipeline_fn("Flaky", move |x: i32| {
            let calls = Arc::clone(&calls_in);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PipelineError::internal("transient"))
                } else {
                    Ok(x)
                }
            }
        });

        let pipeline = WithRetryPipeline::new(flaky, 3, Duration::from_millis(1));
        assert_eq!(pipeline.execute(9).await.unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_wrapper_does_not_retry_rejections() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        let shedding = pipeline_fn("Shedding", move |_: i32| {
            let calls = Arc::clone(&calls_in);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(PipelineError::rejected("limiter", None))
            }
        });

        let pipeline = WithRetryPipeline::new(shedding, 3, Duration::from_millis(1));
        let err = pipeline.execute(1).await.unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_wrapper_bounds_the_pipeline() {
        let slow = pipeline_fn("Slow", |x: i32| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(x)
        });
        let pipeline = WithTimeoutPipeline::new(slow, Duration::from_millis(10));
        let err = pipeline.execute(1).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { .. }));
    }
}
