//! Stage-level deadline decorator.

use async_trait::async_trait;
use std::time::Duration;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::stage::Stage;

/// Races the inner stage against a deadline.
///
/// When the deadline wins, the inner future is dropped (cooperative
/// cancellation at its next await point) and the stage fails with
/// [`PipelineError::Timeout`] naming the inner stage.
pub struct TimeoutStage<S> {
    name: String,
    inner_name: String,
    inner: S,
    duration: Duration,
}

impl<S> TimeoutStage<S> {
    /// Wrap `inner` with a deadline.
    pub fn new<In, Out>(inner: S, duration: Duration) -> Self
    where
        S: Stage<In, Out>,
        In: Send + 'static,
        Out: Send + 'static,
    {
        let inner_name = inner.name().to_owned();
        Self {
            name: format!("{inner_name} (Timeout: {}ms)", duration.as_millis()),
            inner_name,
            inner,
            duration,
        }
    }
}

#[async_trait]
impl<In, Out, S> Stage<In, Out> for TimeoutStage<S>
where
    S: Stage<In, Out>,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, input: In, ctx: &PipelineContext) -> PipelineResult<Out> {
        match tokio::time::timeout(self.duration, self.inner.process(input, ctx)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(PipelineError::Timeout {
                duration: self.duration,
                stage: Some(self.inner_name.clone()),
            }),
        }
    }
}
