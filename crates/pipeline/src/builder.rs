//! Type-state pipeline builder.
//!
//! `PipelineBuilder<In, Cur>` tracks the current end-of-chain type: adding
//! a stage `Cur -> Next` advances it to `PipelineBuilder<In, Next>`, so the
//! stage sequence is type-checked at insertion while the executor stores
//! stages erased.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::behavior::BehaviorContribution;
use crate::cache::PipelineCache;
use crate::config::{ErrorStrategy, PipelineConfiguration};
use crate::error::{PipelineError, PipelineResult};
use crate::executor::{ErasedStage, ErasedStageAdapter, ExecutorPipeline};
use crate::interceptor::{Interceptor, sort_by_priority};
use crate::metadata::{PipelineMetadata, PipelineType};
use crate::metrics::MetricsTracker;
use crate::stage::{Stage, stage_fn};

use conduit_resilience::PolicyConfig;

/// Fluent builder for [`ExecutorPipeline`].
pub struct PipelineBuilder<In, Cur> {
    metadata: PipelineMetadata,
    config: PipelineConfiguration,
    stages: Vec<Arc<dyn ErasedStage>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    contributions: Vec<BehaviorContribution>,
    cache_key: Option<Arc<dyn Fn(&In) -> String + Send + Sync>>,
    _marker: PhantomData<fn(In) -> Cur>,
}

impl<In> PipelineBuilder<In, In>
where
    In: Send + 'static,
{
    /// Start a pipeline taking `In`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: PipelineMetadata::new(name, PipelineType::Custom),
            config: PipelineConfiguration::default(),
            stages: Vec::new(),
            interceptors: Vec::new(),
            contributions: Vec::new(),
            cache_key: None,
            _marker: PhantomData,
        }
    }

    /// Start a pipeline from a template's metadata and configuration.
    #[must_use]
    pub fn from_template(metadata: PipelineMetadata, config: PipelineConfiguration) -> Self {
        Self {
            metadata,
            config,
            stages: Vec::new(),
            interceptors: Vec::new(),
            contributions: Vec::new(),
            cache_key: None,
            _marker: PhantomData,
        }
    }
}

impl<In, Cur> PipelineBuilder<In, Cur>
where
    In: Send + 'static,
    Cur: Send + 'static,
{
    /// Append a stage, advancing the chain type.
    #[must_use]
    pub fn stage<Next, S>(self, stage: S) -> PipelineBuilder<In, Next>
    where
        S: Stage<Cur, Next> + 'static,
        Next: Send + 'static,
    {
        let mut stages = self.stages;
        stages.push(Arc::new(ErasedStageAdapter::new(stage)));
        PipelineBuilder {
            metadata: self.metadata,
            config: self.config,
            stages,
            interceptors: self.interceptors,
            contributions: self.contributions,
            cache_key: self.cache_key,
            _marker: PhantomData,
        }
    }

    /// Append a stage built from an async closure.
    #[must_use]
    pub fn stage_fn<Next, F, Fut>(self, name: impl Into<String>, f: F) -> PipelineBuilder<In, Next>
    where
        F: Fn(Cur) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PipelineResult<Next>> + Send + 'static,
        Next: Send + 'static,
    {
        self.stage(stage_fn(name, f))
    }

    /// Register an interceptor.
    #[must_use]
    pub fn interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Register a behavior contribution.
    #[must_use]
    pub fn behavior(mut self, contribution: BehaviorContribution) -> Self {
        self.contributions.push(contribution);
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfiguration) -> Self {
        self.config = config;
        self
    }

    /// Bound concurrent executions; `0` means unbounded.
    #[must_use]
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.max_concurrency = max_concurrency;
        self
    }

    /// Wrap the behavior chain in a deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = Some(timeout);
        self
    }

    /// Wrap the behavior chain in retries (`max_retries` beyond the one
    /// initial attempt).
    #[must_use]
    pub fn with_retries(mut self, max_retries: usize, delay: Duration) -> Self {
        self.config.max_retries = max_retries;
        self.config.retry_delay = delay;
        self
    }

    /// Set the error strategy.
    #[must_use]
    pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.config.error_strategy = strategy;
        self
    }

    /// Cache results under keys extracted from the input.
    #[must_use]
    pub fn with_cache(
        mut self,
        key: impl Fn(&In) -> String + Send + Sync + 'static,
        duration: Duration,
    ) -> Self {
        self.config.cache_enabled = true;
        self.config.default_cache_duration = duration;
        self.cache_key = Some(Arc::new(key));
        self
    }

    /// Set the metadata description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata = self.metadata.with_description(description);
        self
    }

    /// Add a metadata tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata = self.metadata.with_tag(tag);
        self
    }

    /// Set a metadata property.
    #[must_use]
    pub fn metadata_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata = self.metadata.with_property(key, value);
        self
    }

    /// The configuration as currently set.
    #[must_use]
    pub fn config_ref(&self) -> &PipelineConfiguration {
        &self.config
    }
}

impl<In, Out> PipelineBuilder<In, Out>
where
    In: Clone + Send + Sync + 'static,
    Out: Clone + Send + Sync + 'static,
{
    /// Finalize the pipeline.
    ///
    /// Fails with [`PipelineError::EmptyPipeline`] when neither stages nor
    /// behaviors were added, and surfaces configuration validation errors.
    pub fn build(mut self) -> PipelineResult<ExecutorPipeline<In, Out>> {
        if self.stages.is_empty() && self.contributions.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }
        self.config
            .validate()
            .map_err(conduit_resilience::ResilienceError::from)?;

        self.metadata.record_types::<In, Out>();
        let cache = self.config.cache_enabled.then(|| {
            PipelineCache::new(self.config.max_cache_size, self.config.eviction_policy)
        });
        let semaphore = self.config.concurrency_semaphore();
        let metrics = MetricsTracker::new(self.config.metrics_enabled);

        Ok(ExecutorPipeline {
            metadata: self.metadata,
            stages: self.stages,
            interceptors: sort_by_priority(self.interceptors),
            contributions: self.contributions,
            error_handler: None,
            continue_default: None,
            cache,
            cache_key: self.cache_key,
            semaphore,
            metrics,
            config: self.config,
        })
    }
}
