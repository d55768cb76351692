//! Input validation decorator.

use async_trait::async_trait;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::stage::Stage;

/// Runs a predicate on the input before the inner stage.
///
/// A refused input fails with [`PipelineError::Validation`]; an accepted
/// one records `{name}.Validated = true` on the context and runs the inner
/// stage.
pub struct ValidationStage<S, In> {
    name: String,
    inner_name: String,
    inner: S,
    validator: Box<dyn Fn(&In) -> bool + Send + Sync>,
    message: String,
}

impl<S, In> ValidationStage<S, In> {
    /// Wrap `inner`, refusing inputs the validator rejects.
    pub fn new<Out>(
        inner: S,
        validator: impl Fn(&In) -> bool + Send + Sync + 'static,
        message: impl Into<String>,
    ) -> Self
    where
        S: Stage<In, Out>,
        In: Send + 'static,
        Out: Send + 'static,
    {
        let inner_name = inner.name().to_owned();
        Self {
            name: format!("{inner_name} (Validated)"),
            inner_name,
            inner,
            validator: Box::new(validator),
            message: message.into(),
        }
    }
}

#[async_trait]
impl<In, Out, S> Stage<In, Out> for ValidationStage<S, In>
where
    S: Stage<In, Out>,
    In: Send + Sync + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, input: In, ctx: &PipelineContext) -> PipelineResult<Out> {
        if !(self.validator)(&input) {
            return Err(PipelineError::validation(&self.name, &self.message));
        }
        ctx.set_property(format!("{}.Validated", self.inner_name), true)?;
        self.inner.process(input, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::stage_fn;
    use conduit_core::PipelineId;

    fn ctx() -> PipelineContext {
        PipelineContext::new(PipelineId::v4(), "test")
    }

    #[tokio::test]
    async fn accepted_input_runs_inner_and_marks_context() {
        let stage = ValidationStage::new(
            stage_fn("Double", |x: i32| async move { Ok(x * 2) }),
            |x: &i32| *x > 0,
            "input must be positive",
        );
        let ctx = ctx();
        assert_eq!(stage.process(4, &ctx).await.unwrap(), 8);
        assert_eq!(ctx.get_value("Double.Validated", false), true);
    }

    #[tokio::test]
    async fn refused_input_fails_with_validation_error() {
        let stage = ValidationStage::new(
            stage_fn("Double", |x: i32| async move { Ok(x * 2) }),
            |x: &i32| *x > 0,
            "input must be positive",
        );
        let err = stage.process(-4, &ctx()).await.unwrap_err();
        assert!(
            matches!(err, PipelineError::Validation { ref message, .. } if message == "input must be positive")
        );
    }
}
