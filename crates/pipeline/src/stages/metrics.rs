//! Metrics-recording decorator.

use async_trait::async_trait;
use std::time::Instant;

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::metrics::{MetricSnapshot, MetricsTracker};
use crate::stage::Stage;

/// Records total/success/failure counters and rolling/min/max execution
/// times for the inner stage.
pub struct MetricsStage<S> {
    name: String,
    inner_name: String,
    inner: S,
    tracker: MetricsTracker,
}

impl<S> MetricsStage<S> {
    /// Wrap `inner` with metrics recording.
    pub fn new<In, Out>(inner: S) -> Self
    where
        S: Stage<In, Out>,
        In: Send + 'static,
        Out: Send + 'static,
    {
        let inner_name = inner.name().to_owned();
        Self {
            name: format!("{inner_name} (Metrics)"),
            inner_name,
            inner,
            tracker: MetricsTracker::new(true),
        }
    }

    /// Snapshot of the recorded metrics.
    #[must_use]
    pub fn get_metrics(&self) -> Option<MetricSnapshot> {
        self.tracker.snapshot(&self.inner_name)
    }
}

#[async_trait]
impl<In, Out, S> Stage<In, Out> for MetricsStage<S>
where
    S: Stage<In, Out>,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, input: In, ctx: &PipelineContext) -> PipelineResult<Out> {
        let started = Instant::now();
        let result = self.inner.process(input, ctx).await;
        self.tracker
            .record(&self.inner_name, started.elapsed(), result.is_ok());
        result
    }
}
