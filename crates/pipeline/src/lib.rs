//! # Conduit Pipeline
//!
//! An in-process message pipeline engine: compose typed transformation
//! stages, cross-cutting behaviors, and interceptors into a pipeline, and
//! execute it with cancellation, metrics, caching, and failure handling.
//!
//! The core contract is [`Pipeline`], exposing only execution; the fluent
//! surface lives in [`PipelineExt`] and the composition wrappers in
//! [`compose`]. Staged pipelines are assembled with [`PipelineBuilder`]
//! (or a [`PipelineFactory`] template) and driven by the executor, which
//! threads one [`PipelineContext`] through every interceptor, behavior,
//! and stage of an execution.

pub mod behavior;
pub mod cache;
pub mod compose;
pub mod config;
pub mod context;
pub mod error;
pub mod interceptor;
pub mod metadata;
pub mod metrics;
pub mod stage;
pub mod stages;

mod builder;
mod executor;
mod factory;
mod pipeline;

pub use behavior::{
    AnyValue, Behavior, BehaviorContribution, BehaviorPhase, BehaviorPlacement, Next,
    RetryBehavior, TimeoutBehavior,
};
pub use builder::PipelineBuilder;
pub use cache::{CacheEntry, EvictionPolicy, PipelineCache};
pub use compose::{
    AnyInput, BranchPipeline, BranchPredicate, CachingPipeline, DataflowParallelPipeline,
    FilterPipeline, MapPipeline, MultiBranchPipeline, ParallelPipeline, ThenPipeline,
    TypeSwitchPipeline, WithRetryPipeline, WithTimeoutPipeline,
};
pub use config::{ErrorStrategy, PipelineConfiguration};
pub use context::PipelineContext;
pub use error::{PipelineError, PipelineResult};
pub use executor::ExecutorPipeline;
pub use factory::PipelineFactory;
pub use interceptor::{Interceptor, TracingInterceptor, ValidationInterceptor};
pub use metadata::{PipelineMetadata, PipelineType};
pub use metrics::{MetricSnapshot, MetricsTracker};
pub use pipeline::{FnPipeline, Pipeline, PipelineExt, pipeline_fn};
pub use stage::{Stage, StageExt, stage_fn};

/// Prelude
pub mod prelude {
    pub use crate::builder::PipelineBuilder;
    pub use crate::context::PipelineContext;
    pub use crate::error::{PipelineError, PipelineResult};
    pub use crate::factory::PipelineFactory;
    pub use crate::pipeline::{Pipeline, PipelineExt, pipeline_fn};
    pub use crate::stage::{Stage, StageExt, stage_fn};

    pub use conduit_core::keys;
    pub use conduit_core::{ContextId, PipelineId};
}
