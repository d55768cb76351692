//! Stage-level retry decorator.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::stage::Stage;

/// Re-runs the inner stage on failure.
///
/// `max_retries` means retries in addition to the one initial attempt, so
/// the inner stage runs at most `max_retries + 1` times with `delay`
/// between attempts. The attempt number is recorded on the context under
/// `{name}.Attempt`. Rejections and cancellation are never retried.
pub struct RetryStage<S> {
    name: String,
    inner_name: String,
    inner: S,
    max_retries: usize,
    delay: Duration,
}

impl<S> RetryStage<S> {
    /// Wrap `inner` with up to `max_retries` retries.
    pub fn new<In, Out>(inner: S, max_retries: usize, delay: Duration) -> Self
    where
        S: Stage<In, Out>,
        In: Send + 'static,
        Out: Send + 'static,
    {
        let inner_name = inner.name().to_owned();
        Self {
            name: format!("{inner_name} (Retry x{max_retries})"),
            inner_name,
            inner,
            max_retries,
            delay,
        }
    }
}

#[async_trait]
impl<In, Out, S> Stage<In, Out> for RetryStage<S>
where
    S: Stage<In, Out>,
    In: Clone + Send + Sync + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, input: In, ctx: &PipelineContext) -> PipelineResult<Out> {
        let mut retries = 0usize;
        loop {
            ctx.set_property(format!("{}.Attempt", self.inner_name), retries + 1)?;
            match self.inner.process(input.clone(), ctx).await {
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
                        return Err(PipelineError::retry_exhausted(retries, error));
                    }
                    retries += 1;
                    debug!(
                        stage = %self.inner_name,
                        retry = retries,
                        error = %error,
                        "retrying stage"
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}
