//! Template constructors for common pipeline shapes.

use std::time::Duration;

use crate::builder::PipelineBuilder;
use crate::config::{ErrorStrategy, PipelineConfiguration};
use crate::context::PipelineContext;
use crate::interceptor::{TracingInterceptor, ValidationInterceptor};
use crate::metadata::{PipelineMetadata, PipelineType};

/// Produces pre-configured [`PipelineBuilder`]s for common templates.
pub struct PipelineFactory;

impl PipelineFactory {
    fn template<In>(
        name: impl Into<String>,
        pipeline_type: PipelineType,
        config: PipelineConfiguration,
    ) -> PipelineBuilder<In, In>
    where
        In: Send + 'static,
    {
        let mut builder = PipelineBuilder::from_template(
            PipelineMetadata::new(name, pipeline_type),
            config,
        );
        if builder.config_ref().tracing_enabled {
            builder = builder.interceptor(TracingInterceptor::new());
        }
        builder
    }

    /// One-at-a-time execution.
    #[must_use]
    pub fn sequential<In>(name: impl Into<String>) -> PipelineBuilder<In, In>
    where
        In: Send + 'static,
    {
        Self::template(
            name,
            PipelineType::Sequential,
            PipelineConfiguration {
                max_concurrency: 1,
                async_execution: false,
                ..PipelineConfiguration::default()
            },
        )
    }

    /// Concurrent execution bounded at twice the CPU count.
    #[must_use]
    pub fn parallel<In>(name: impl Into<String>) -> PipelineBuilder<In, In>
    where
        In: Send + 'static,
    {
        let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZero::get);
        Self::template(
            name,
            PipelineType::Parallel,
            PipelineConfiguration {
                max_concurrency: cpus * 2,
                ..PipelineConfiguration::default()
            },
        )
    }

    /// Event reaction: unbounded concurrency, dead-letter diversion.
    #[must_use]
    pub fn event_driven<In>(name: impl Into<String>) -> PipelineBuilder<In, In>
    where
        In: Send + 'static,
    {
        Self::template(
            name,
            PipelineType::EventDriven,
            PipelineConfiguration {
                dead_letter_enabled: true,
                error_strategy: ErrorStrategy::DeadLetter,
                ..PipelineConfiguration::default()
            },
        )
    }

    /// Fixed-size batch intake; the size lands in metadata properties.
    #[must_use]
    pub fn batch<In>(name: impl Into<String>, batch_size: usize) -> PipelineBuilder<In, In>
    where
        In: Send + 'static,
    {
        let mut builder = Self::template(
            name,
            PipelineType::Batch,
            PipelineConfiguration::default(),
        );
        builder = builder.metadata_property("batch_size", batch_size as u64);
        builder
    }

    /// Continuous element flow.
    #[must_use]
    pub fn stream<In>(name: impl Into<String>) -> PipelineBuilder<In, In>
    where
        In: Send + 'static,
    {
        Self::template(
            name,
            PipelineType::Stream,
            PipelineConfiguration::default(),
        )
    }

    /// Validation front: fail fast, with a context validator registered.
    #[must_use]
    pub fn validation<In>(
        name: impl Into<String>,
        validator: impl Fn(&PipelineContext) -> Result<(), String> + Send + Sync + 'static,
    ) -> PipelineBuilder<In, In>
    where
        In: Send + 'static,
    {
        Self::template(
            name,
            PipelineType::Validation,
            PipelineConfiguration {
                validation_enabled: true,
                error_strategy: ErrorStrategy::FailFast,
                ..PipelineConfiguration::default()
            },
        )
        .interceptor(ValidationInterceptor::new(validator))
    }

    /// Data transformation with result caching on by default.
    #[must_use]
    pub fn transformation<In>(name: impl Into<String>) -> PipelineBuilder<In, In>
    where
        In: Send + 'static,
    {
        Self::template(
            name,
            PipelineType::Transformation,
            PipelineConfiguration {
                cache_enabled: true,
                default_cache_duration: Duration::from_secs(300),
                ..PipelineConfiguration::default()
            },
        )
    }

    /// Long-running transaction: retries, tracing, dead-letter diversion.
    #[must_use]
    pub fn saga<In>(name: impl Into<String>) -> PipelineBuilder<In, In>
    where
        In: Send + 'static,
    {
        Self::template(
            name,
            PipelineType::Saga,
            PipelineConfiguration {
                max_retries: 3,
                retry_delay: Duration::from_millis(200),
                tracing_enabled: true,
                dead_letter_enabled: true,
                error_strategy: ErrorStrategy::DeadLetter,
                ..PipelineConfiguration::default()
            },
        )
    }

    /// Predicate-routed composition.
    #[must_use]
    pub fn conditional<In>(name: impl Into<String>) -> PipelineBuilder<In, In>
    where
        In: Send + 'static,
    {
        Self::template(
            name,
            PipelineType::Conditional,
            PipelineConfiguration::default(),
        )
    }
}
