//! Execution logging decorator.

use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, warn};

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::stage::Stage;

/// Logs stage start, duration, and outcome, forwarding the inner result or
/// error unchanged.
pub struct LoggingStage<S> {
    name: String,
    inner_name: String,
    inner: S,
}

impl<S> LoggingStage<S> {
    /// Wrap `inner` with start/finish logging.
    pub fn new<In, Out>(inner: S) -> Self
    where
        S: Stage<In, Out>,
        In: Send + 'static,
        Out: Send + 'static,
    {
        let inner_name = inner.name().to_owned();
        Self {
            name: format!("{inner_name} (Logged)"),
            inner_name,
            inner,
        }
    }
}

#[async_trait]
impl<In, Out, S> Stage<In, Out> for LoggingStage<S>
where
    S: Stage<In, Out>,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, input: In, ctx: &PipelineContext) -> PipelineResult<Out> {
        debug!(
            stage = %self.inner_name,
            context = %ctx.context_id,
            "stage starting"
        );
        let started = Instant::now();
        let result = self.inner.process(input, ctx).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(_) => debug!(
                stage = %self.inner_name,
                context = %ctx.context_id,
                elapsed_ms,
                "stage completed"
            ),
            Err(error) => warn!(
                stage = %self.inner_name,
                context = %ctx.context_id,
                elapsed_ms,
                error = %error,
                "stage failed"
            ),
        }
        result
    }
}
