//! Per-execution pipeline context.
//!
//! One context travels through every layer of a single execution: the
//! executor, interceptors, behaviors, and stages all see the same instance
//! behind an `Arc`. The property store is a concurrent map safe for reads
//! during handler execution and writes from stages on different workers;
//! the cancellation flag is a [`CancellationToken`] so external
//! cancellation and [`PipelineContext::cancel`] combine into one view.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use conduit_core::keys;
use conduit_core::{ContextId, PipelineId};

use crate::error::{PipelineError, PipelineResult};

/// Runtime context for one pipeline execution.
///
/// Not serializable: it holds runtime resources (cancellation token,
/// type-erased input/result slots).
pub struct PipelineContext {
    /// Unique identifier of this execution.
    pub context_id: ContextId,
    /// Identifier of the executing pipeline.
    pub pipeline_id: PipelineId,
    /// Name of the executing pipeline.
    pub pipeline_name: String,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,

    created_instant: Instant,
    start_time: RwLock<Option<Instant>>,
    end_time: RwLock<Option<Instant>>,
    current_stage: RwLock<Option<String>>,
    /// -1 until the first stage completes.
    last_completed: AtomicI64,
    properties: DashMap<String, Value>,
    cancellation: CancellationToken,
    input: Mutex<Option<Box<dyn Any + Send>>>,
    result: Mutex<Option<Box<dyn Any + Send>>>,
    exception: RwLock<Option<PipelineError>>,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("context_id", &self.context_id)
            .field("pipeline_id", &self.pipeline_id)
            .field("pipeline_name", &self.pipeline_name)
            .field("properties", &self.properties.len())
            .field("is_cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl PipelineContext {
    /// Create a context for a pipeline.
    #[must_use]
    pub fn new(pipeline_id: PipelineId, pipeline_name: impl Into<String>) -> Self {
        Self {
            context_id: ContextId::v4(),
            pipeline_id,
            pipeline_name: pipeline_name.into(),
            created_at: Utc::now(),
            created_instant: Instant::now(),
            start_time: RwLock::new(None),
            end_time: RwLock::new(None),
            current_stage: RwLock::new(None),
            last_completed: AtomicI64::new(-1),
            properties: DashMap::new(),
            cancellation: CancellationToken::new(),
            input: Mutex::new(None),
            result: Mutex::new(None),
            exception: RwLock::new(None),
        }
    }

    /// Create a context pre-seeded with a correlation id.
    #[must_use]
    pub fn create_with_correlation(
        pipeline_id: PipelineId,
        pipeline_name: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        let ctx = Self::new(pipeline_id, pipeline_name);
        ctx.properties
            .insert(keys::CORRELATION_ID.to_owned(), Value::from(correlation_id.into()));
        ctx
    }

    /// Create a context pre-seeded with user (and optionally tenant)
    /// identity.
    #[must_use]
    pub fn create_for_user(
        pipeline_id: PipelineId,
        pipeline_name: impl Into<String>,
        user_id: impl Into<String>,
        tenant_id: Option<String>,
    ) -> Self {
        let ctx = Self::new(pipeline_id, pipeline_name);
        ctx.properties
            .insert(keys::USER_ID.to_owned(), Value::from(user_id.into()));
        if let Some(tenant) = tenant_id {
            ctx.properties
                .insert(keys::TENANT_ID.to_owned(), Value::from(tenant));
        }
        ctx
    }

    /// Link this context's cancellation to a caller-provided token.
    ///
    /// The context observes the parent's cancellation; cancelling the
    /// context does not cancel the parent.
    #[must_use]
    pub fn with_parent_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancellation = parent.child_token();
        self
    }

    // ── Properties ─────────────────────────────────────────────────────

    /// Set a property, overwriting any existing value.
    ///
    /// Fails with [`PipelineError::InvalidKey`] on an empty or whitespace
    /// key and [`PipelineError::NullValue`] when the value serializes to
    /// null.
    pub fn set_property(&self, key: impl Into<String>, value: impl Serialize) -> PipelineResult<()> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(PipelineError::InvalidKey { key });
        }
        let value = serde_json::to_value(value)
            .map_err(|e| PipelineError::internal_with_source("unserializable property value", e))?;
        if value.is_null() {
            return Err(PipelineError::NullValue { key });
        }
        self.properties.insert(key, value);
        Ok(())
    }

    /// Get a property's raw value.
    #[must_use]
    pub fn get_property(&self, key: &str) -> Option<Value> {
        self.properties.get(key).map(|entry| entry.value().clone())
    }

    /// Get a property deserialized as `T`, or `default` when the key is
    /// absent or the value does not deserialize.
    pub fn get_value<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_property(key)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or(default)
    }

    /// Whether a property exists.
    #[must_use]
    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Remove a property. Returns its value when one was present.
    pub fn remove_property(&self, key: &str) -> Option<Value> {
        self.properties.remove(key).map(|(_, value)| value)
    }

    /// Remove every property.
    pub fn clear_properties(&self) {
        self.properties.clear();
    }

    /// Number of properties.
    #[must_use]
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Merge the other context's properties into this one.
    ///
    /// With `overwrite = false`, keys already present here are preserved.
    pub fn merge_from(&self, other: &Self, overwrite: bool) {
        for entry in &other.properties {
            if overwrite || !self.properties.contains_key(entry.key()) {
                self.properties.insert(entry.key().clone(), entry.value().clone());
            }
        }
    }

    // ── Cancellation ───────────────────────────────────────────────────

    /// Request cancellation of this execution.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Whether cancellation has been requested, manually or by a linked
    /// token.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// The cancellation token observed by stages and policies.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Fail with [`PipelineError::Cancelled`] when cancellation has been
    /// requested.
    pub fn check_cancelled(&self) -> PipelineResult<()> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    // ── Timing ─────────────────────────────────────────────────────────

    /// Record the execution start.
    pub fn mark_started(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    /// Record the execution end.
    pub fn mark_ended(&self) {
        *self.end_time.write() = Some(Instant::now());
    }

    /// Monotonic time since the context was created.
    #[must_use]
    pub fn get_elapsed_time(&self) -> Duration {
        self.created_instant.elapsed()
    }

    /// `end - start` when both are recorded, `now - start` while running,
    /// zero before the execution starts.
    #[must_use]
    pub fn get_execution_duration(&self) -> Duration {
        let Some(start) = *self.start_time.read() else {
            return Duration::ZERO;
        };
        match *self.end_time.read() {
            Some(end) => end.duration_since(start),
            None => start.elapsed(),
        }
    }

    // ── Stage progress ─────────────────────────────────────────────────

    /// The stage currently running, if any.
    #[must_use]
    pub fn current_stage(&self) -> Option<String> {
        self.current_stage.read().clone()
    }

    /// Record the stage currently running.
    pub fn set_current_stage(&self, name: impl Into<String>) {
        *self.current_stage.write() = Some(name.into());
    }

    /// Advance the completed-stage index. The index never decreases.
    pub fn mark_stage_completed(&self, index: usize) {
        self.last_completed
            .fetch_max(i64::try_from(index).unwrap_or(i64::MAX), Ordering::AcqRel);
    }

    /// Index of the last completed stage, `None` before any completes.
    #[must_use]
    pub fn last_completed_stage_index(&self) -> Option<usize> {
        let index = self.last_completed.load(Ordering::Acquire);
        usize::try_from(index).ok()
    }

    // ── Input / result / error slots ───────────────────────────────────

    /// Store the execution input.
    pub fn set_input<T: Send + 'static>(&self, input: T) {
        *self.input.lock() = Some(Box::new(input));
    }

    /// Take the execution input back out, if it is of type `T`.
    pub fn take_input<T: Send + 'static>(&self) -> Option<T> {
        let mut slot = self.input.lock();
        match slot.take() {
            Some(boxed) => match boxed.downcast::<T>() {
                Ok(value) => Some(*value),
                Err(other) => {
                    *slot = Some(other);
                    None
                }
            },
            None => None,
        }
    }

    /// Store a result, e.g. from an error-absorbing interceptor.
    pub fn set_result<T: Send + 'static>(&self, result: T) {
        *self.result.lock() = Some(Box::new(result));
    }

    /// Take the stored result, if it is of type `T`.
    pub fn take_result<T: Send + 'static>(&self) -> Option<T> {
        let mut slot = self.result.lock();
        match slot.take() {
            Some(boxed) => match boxed.downcast::<T>() {
                Ok(value) => Some(*value),
                Err(other) => {
                    *slot = Some(other);
                    None
                }
            },
            None => None,
        }
    }

    /// Record the error that failed this execution.
    pub fn set_exception(&self, error: PipelineError) {
        *self.exception.write() = Some(error);
    }

    /// The error that failed this execution, if any.
    #[must_use]
    pub fn exception(&self) -> Option<PipelineError> {
        self.exception.read().clone()
    }

    // ── Derivation ─────────────────────────────────────────────────────

    /// Shallow copy: same ids and pipeline references, cloned properties,
    /// shared cancellation.
    #[must_use]
    pub fn copy(&self) -> Self {
        let copy = Self {
            context_id: self.context_id,
            pipeline_id: self.pipeline_id,
            pipeline_name: self.pipeline_name.clone(),
            created_at: self.created_at,
            created_instant: self.created_instant,
            start_time: RwLock::new(*self.start_time.read()),
            end_time: RwLock::new(*self.end_time.read()),
            current_stage: RwLock::new(self.current_stage()),
            last_completed: AtomicI64::new(self.last_completed.load(Ordering::Acquire)),
            properties: DashMap::new(),
            cancellation: self.cancellation.clone(),
            input: Mutex::new(None),
            result: Mutex::new(None),
            exception: RwLock::new(None),
        };
        for entry in &self.properties {
            copy.properties.insert(entry.key().clone(), entry.value().clone());
        }
        copy
    }

    /// Derive a child context for fan-out work.
    ///
    /// The child gets a fresh id, inherits only the allowlisted identity
    /// properties, records this context as its parent, and shares
    /// cancellation (cancelling the parent cancels the child, not the
    /// other way round).
    #[must_use]
    pub fn create_child_context(&self) -> Self {
        let child = Self {
            context_id: ContextId::v4(),
            pipeline_id: self.pipeline_id,
            pipeline_name: self.pipeline_name.clone(),
            created_at: Utc::now(),
            created_instant: Instant::now(),
            start_time: RwLock::new(None),
            end_time: RwLock::new(None),
            current_stage: RwLock::new(None),
            last_completed: AtomicI64::new(-1),
            properties: DashMap::new(),
            cancellation: self.cancellation.child_token(),
            input: Mutex::new(None),
            result: Mutex::new(None),
            exception: RwLock::new(None),
        };
        for key in keys::CHILD_INHERITED {
            if let Some(value) = self.get_property(key) {
                child.properties.insert((*key).to_owned(), value);
            }
        }
        child.properties.insert(
            keys::PARENT_CONTEXT_ID.to_owned(),
            Value::from(self.context_id.to_string()),
        );
        child.properties.insert(
            keys::PARENT_PIPELINE_ID.to_owned(),
            Value::from(self.pipeline_id.to_string()),
        );
        child
    }
}
