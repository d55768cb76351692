//! Predicate routing: two-way branch, ordered multi-branch, type switch.

use async_trait::async_trait;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Pipeline;

/// Routing predicate over a pipeline input.
///
/// Synchronous closures `Fn(&In) -> bool` implement this automatically;
/// implement the trait directly for async predicates.
#[async_trait]
pub trait BranchPredicate<In: ?Sized>: Send + Sync {
    /// Whether the branch accepts `input`.
    async fn evaluate(&self, input: &In) -> bool;
}

#[async_trait]
impl<In, F> BranchPredicate<In> for F
where
    F: Fn(&In) -> bool + Send + Sync,
    In: Sync + ?Sized,
{
    async fn evaluate(&self, input: &In) -> bool {
        self(input)
    }
}

/// Routes to one of two pipelines on a predicate over the input. Only the
/// chosen branch executes.
pub struct BranchPipeline<P1, P2, Pred> {
    name: String,
    predicate: Pred,
    when_true: P1,
    when_false: P2,
}

impl<P1, P2, Pred> BranchPipeline<P1, P2, Pred> {
    /// Route to `when_true` when the predicate holds, `when_false`
    /// otherwise.
    pub fn new<In, Out>(predicate: Pred, when_true: P1, when_false: P2) -> Self
    where
        Pred: BranchPredicate<In>,
        P1: Pipeline<In, Out>,
        P2: Pipeline<In, Out>,
        In: Send + Sync + 'static,
        Out: Send + 'static,
    {
        Self {
            name: format!("Branch({} | {})", when_true.name(), when_false.name()),
            predicate,
            when_true,
            when_false,
        }
    }
}

#[async_trait]
impl<In, Out, P1, P2, Pred> Pipeline<In, Out> for BranchPipeline<P1, P2, Pred>
where
    Pred: BranchPredicate<In>,
    P1: Pipeline<In, Out>,
    P2: Pipeline<In, Out>,
    In: Send + Sync + 'static,
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
        if self.predicate.evaluate(&input).await {
            self.when_true.execute_with_context(input, ctx).await
        } else {
            self.when_false.execute_with_context(input, ctx).await
        }
    }
}

struct BranchCase<In, Out> {
    name: String,
    predicate: Arc<dyn BranchPredicate<In>>,
    pipeline: Arc<dyn Pipeline<In, Out>>,
}

/// Ordered list of `(predicate, pipeline)` cases with an optional default.
///
/// Evaluation short-circuits on the first predicate that holds. When none
/// match and no default is set, execution fails with
/// [`PipelineError::NoMatchingBranch`].
pub struct MultiBranchPipeline<In, Out> {
    name: String,
    cases: Vec<BranchCase<In, Out>>,
    default: Option<Arc<dyn Pipeline<In, Out>>>,
}

impl<In, Out> MultiBranchPipeline<In, Out>
where
    In: Send + Sync + 'static,
    Out: Send + 'static,
{
    /// Create an empty multi-branch.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cases: Vec::new(),
            default: None,
        }
    }

    /// Append a case; cases are tried in registration order.
    #[must_use]
    pub fn case(
        mut self,
        name: impl Into<String>,
        predicate: impl BranchPredicate<In> + 'static,
        pipeline: impl Pipeline<In, Out> + 'static,
    ) -> Self {
        self.cases.push(BranchCase {
            name: name.into(),
            predicate: Arc::new(predicate),
            pipeline: Arc::new(pipeline),
        });
        self
    }

    /// Set the fallback pipeline for unmatched inputs.
    #[must_use]
    pub fn default_branch(mut self, pipeline: impl Pipeline<In, Out> + 'static) -> Self {
        self.default = Some(Arc::new(pipeline));
        self
    }
}

#[async_trait]
impl<In, Out> Pipeline<In, Out> for MultiBranchPipeline<In, Out>
where
    In: Send + Sync + 'static,
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
        for case in &self.cases {
            if case.predicate.evaluate(&input).await {
                debug!(pipeline = %self.name, branch = %case.name, "routing");
                return case.pipeline.execute_with_context(input, ctx).await;
            }
        }
        match &self.default {
            Some(default) => {
                debug!(pipeline = %self.name, branch = "default", "routing");
                default.execute_with_context(input, ctx).await
            }
            None => Err(PipelineError::NoMatchingBranch {
                pipeline: self.name.clone(),
            }),
        }
    }
}

/// Type-erased input for a [`TypeSwitchPipeline`].
pub type AnyInput = Box<dyn Any + Send + Sync>;

/// Multi-branch whose predicates are runtime type tests.
///
/// Type tests are exact `TypeId` matches (the Rust rendition of runtime
/// type dispatch; trait objects carry no subtype information).
pub struct TypeSwitchPipeline<Out> {
    inner: MultiBranchPipeline<AnyInput, Out>,
}

impl<Out> TypeSwitchPipeline<Out>
where
    Out: Send + 'static,
{
    /// Create an empty type switch.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: MultiBranchPipeline::new(name),
        }
    }

    /// Route inputs of type `T` to `pipeline`.
    #[must_use]
    pub fn case<T, P>(mut self, pipeline: P) -> Self
    where
        T: Send + Sync + 'static,
        P: Pipeline<T, Out> + 'static,
    {
        let case_name = std::any::type_name::<T>();
        self.inner = self.inner.case(
            case_name,
            IsType::<T>(PhantomData),
            DowncastPipeline {
                inner: pipeline,
                _marker: PhantomData::<fn(T)>,
            },
        );
        self
    }

    /// Set the fallback for inputs no case accepts.
    #[must_use]
    pub fn default_branch(mut self, pipeline: impl Pipeline<AnyInput, Out> + 'static) -> Self {
        self.inner = self.inner.default_branch(pipeline);
        self
    }
}

#[async_trait]
impl<Out> Pipeline<AnyInput, Out> for TypeSwitchPipeline<Out>
where
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn execute_with_context(
        &self,
        input: AnyInput,
        ctx: Arc<PipelineContext>,
    ) -> PipelineResult<Out> {
        self.inner.execute_with_context(input, ctx).await
    }
}

struct IsType<T>(PhantomData<fn(T)>);

#[async_trait]
impl<T: 'static> BranchPredicate<AnyInput> for IsType<T> {
    async fn evaluate(&self, input: &AnyInput) -> bool {
        (**input).is::<T>()
    }
}

struct DowncastPipeline<P, T> {
    inner: P,
    _marker: PhantomData<fn(T)>,
}

#[async_trait]
impl<T, Out, P> Pipeline<AnyInput, Out> for DowncastPipeline<P, T>
where
    P: Pipeline<T, Out>,
    T: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn execute_with_context(
        &self,
        input: AnyInput,
        ctx: Arc<PipelineContext>,
    ) -> PipelineResult<Out> {
        match input.downcast::<T>() {
            Ok(input) => self.inner.execute_with_context(*input, ctx).await,
            Err(_) => Err(PipelineError::internal(format!(
                "type switch routed a value that is not {}",
                std::any::type_name::<T>()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pipeline_fn;

    fn constant(name: &str, value: i32) -> impl Pipeline<i32, i32> + use<> {
        let name = name.to_owned();
        pipeline_fn(name, move |_: i32| async move { Ok(value) })
    }

    #[tokio::test]
    async fn branch_routes_and_runs_only_one_side() {
        let branch = BranchPipeline::new(
            |x: &i32| *x > 0,
            constant("Positive", 1),
            constant("NonPositive", -1),
        );
        assert_eq!(branch.execute(5).await.unwrap(), 1);
        assert_eq!(branch.execute(-3).await.unwrap(), -1);
        assert_eq!(branch.execute(0).await.unwrap(), -1);
    }

    struct AsyncPositive;

    #[async_trait]
    impl BranchPredicate<i32> for AsyncPositive {
        async fn evaluate(&self, input: &i32) -> bool {
            tokio::task::yield_now().await;
            *input > 0
        }
    }

    #[tokio::test]
    async fn async_predicates_are_supported() {
        let branch = BranchPipeline::new(AsyncPositive, constant("Pos", 1), constant("Neg", -1));
        assert_eq!(branch.execute(7).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn multi_branch_first_match_wins() {
        let pipeline = MultiBranchPipeline::new("Router")
            .case("negative", |x: &i32| *x < 0, constant("Neg", -1))
            .case("small", |x: &i32| *x < 100, constant("Small", 1))
            .case("always", |_: &i32| true, constant("Big", 2));

        assert_eq!(pipeline.execute(-5).await.unwrap(), -1);
        assert_eq!(pipeline.execute(50).await.unwrap(), 1);
        assert_eq!(pipeline.execute(500).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn multi_branch_without_match_or_default_fails() {
        let pipeline: MultiBranchPipeline<i32, i32> = MultiBranchPipeline::new("Router")
            .case("never", |_: &i32| false, constant("Never", 0));

        let err = pipeline.execute(1).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoMatchingBranch { ref pipeline } if pipeline == "Router"));
    }

    #[tokio::test]
    async fn multi_branch_default_catches_unmatched() {
        let pipeline = MultiBranchPipeline::new("Router")
            .case("never", |_: &i32| false, constant("Never", 0))
            .default_branch(constant("Default", 9));
        assert_eq!(pipeline.execute(1).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn type_switch_routes_by_runtime_type() {
        let pipeline = TypeSwitchPipeline::new("TypeRouter")
            .case::<i32, _>(pipeline_fn("Int", |x: i32| async move { Ok(format!("int:{x}")) }))
            .case::<String, _>(pipeline_fn("Str", |s: String| async move { Ok(format!("str:{s}")) }));

        let result = pipeline.execute(Box::new(42i32) as AnyInput).await.unwrap();
        assert_eq!(result, "int:42");

        let result = pipeline
            .execute(Box::new("hi".to_owned()) as AnyInput)
            .await
            .unwrap();
        assert_eq!(result, "str:hi");

        let err = pipeline.execute(Box::new(1.5f64) as AnyInput).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoMatchingBranch { .. }));
    }
}
