//! Well-known context property keys.
//!
//! These keys are part of the public contract: interoperating pipelines read
//! and write them by name, and child-context derivation copies a fixed
//! allowlist of them. Keep the string values stable.

/// Correlation identifier propagated across pipeline boundaries.
pub const CORRELATION_ID: &str = "CorrelationId";

/// Identifier of the user on whose behalf the pipeline runs.
pub const USER_ID: &str = "UserId";

/// Tenant the execution belongs to.
pub const TENANT_ID: &str = "TenantId";

/// Context id of the parent execution, set on child contexts.
pub const PARENT_CONTEXT_ID: &str = "ParentContextId";

/// Pipeline id of the parent execution, set on child contexts.
pub const PARENT_PIPELINE_ID: &str = "ParentPipelineId";

/// Set to `true` when the dead-letter error strategy diverted a failure.
pub const DEAD_LETTER: &str = "DeadLetter";

/// Human-readable reason recorded alongside [`DEAD_LETTER`].
pub const DEAD_LETTER_REASON: &str = "DeadLetterReason";

/// Collected validation error messages.
pub const VALIDATION_ERRORS: &str = "ValidationErrors";

/// Set to `true` when validation accepted the input.
pub const VALIDATION_PASSED: &str = "ValidationPassed";

/// Set to `true` when validation refused the input.
pub const VALIDATION_FAILED: &str = "ValidationFailed";

/// Set to `true` on the context when a filter suppressed the output.
pub const FILTERED: &str = "Filtered";

/// Element index within a parallel fan-out, set on each child context.
pub const PARALLEL_INDEX: &str = "ParallelPipeline.Index";

/// Worker thread id within a parallel fan-out.
pub const PARALLEL_THREAD_ID: &str = "ParallelPipeline.ThreadId";

/// Number of elements processed by a dataflow pipeline execution.
pub const DATAFLOW_PROCESSED_COUNT: &str = "DataflowPipeline.ProcessedCount";

/// Prefix for feature flags (`Feature.{name}`).
pub const FEATURE_PREFIX: &str = "Feature.";

/// Properties a child context inherits from its parent. Everything else is
/// deliberately absent on the child.
pub const CHILD_INHERITED: &[&str] = &[CORRELATION_ID, USER_ID, TENANT_ID];

/// Build a feature-flag key for `name`.
#[must_use]
pub fn feature(name: &str) -> String {
    format!("{FEATURE_PREFIX}{name}")
}
