//! Behaviors: middleware around the stage chain.
//!
//! A behavior receives the execution context and a continuation. It may
//! short-circuit (never proceed), decorate the continuation (timeout,
//! retry), proceed multiple times, or override the result. Behaviors are
//! registered as [`BehaviorContribution`]s carrying phase, placement,
//! priority, and an optional per-execution constraint; placement
//! resolution produces the total order the chain is built from.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use conduit_resilience::RetryPolicy;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};

/// Type-erased value flowing between behaviors and stages.
pub type AnyValue = Box<dyn Any + Send>;

/// Middleware around the stage chain.
#[async_trait]
pub trait Behavior: Send + Sync {
    /// Behavior name, used in logs.
    fn name(&self) -> &str;

    /// Run this behavior. Call `next.proceed(ctx)` zero or more times; the
    /// returned value becomes the chain's output at this layer.
    async fn execute(
        &self,
        ctx: Arc<PipelineContext>,
        next: Next<'_>,
    ) -> PipelineResult<AnyValue>;
}

/// The rest of the chain after the current behavior.
///
/// `Copy`, so a behavior can proceed any number of times.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    behaviors: &'a [Arc<dyn Behavior>],
    terminal: &'a Terminal<'a>,
}

/// The chain's end: stage iteration.
pub type Terminal<'a> =
    dyn Fn(Arc<PipelineContext>) -> BoxFuture<'a, PipelineResult<AnyValue>> + Send + Sync + 'a;

impl<'a> Next<'a> {
    /// Build the head of a chain over `behaviors` ending in `terminal`.
    #[must_use]
    pub fn chain(behaviors: &'a [Arc<dyn Behavior>], terminal: &'a Terminal<'a>) -> Self {
        Self {
            behaviors,
            terminal,
        }
    }

    /// Run the remainder of the chain.
    pub fn proceed(self, ctx: Arc<PipelineContext>) -> BoxFuture<'a, PipelineResult<AnyValue>> {
        match self.behaviors.split_first() {
            None => (self.terminal)(ctx),
            Some((head, rest)) => {
                let head = Arc::clone(head);
                let next = Next {
                    behaviors: rest,
                    terminal: self.terminal,
                };
                Box::pin(async move { head.execute(ctx, next).await })
            }
        }
    }
}

/// Coarse ordering bucket for behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BehaviorPhase {
    /// Before the main processing behaviors.
    PreProcessing,
    /// The main processing bucket.
    Processing,
    /// After the main processing behaviors.
    PostProcessing,
}

/// Fine ordering directive within a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BehaviorPlacement {
    /// Ordered by priority among unplaced contributions.
    Anywhere,
    /// Before everything else in the phase.
    First,
    /// After everything else in the phase.
    Last,
    /// Immediately before the contribution with the given id.
    Before(String),
    /// Immediately after the contribution with the given id.
    After(String),
    /// Drop the contribution with the given id and take its place.
    Replace(String),
}

/// A registered behavior with ordering metadata.
#[derive(Clone)]
pub struct BehaviorContribution {
    /// Unique id, referenced by `Before`/`After`/`Replace` placements.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// The behavior itself.
    pub behavior: Arc<dyn Behavior>,
    /// Coarse ordering bucket.
    pub phase: BehaviorPhase,
    /// Fine ordering directive within the phase.
    pub placement: BehaviorPlacement,
    /// Tie-break within the phase; lower runs first.
    pub priority: i32,
    /// Disabled contributions are skipped entirely.
    pub is_enabled: bool,
    /// Per-execution constraint; the behavior participates only when it
    /// holds for the context.
    pub constraint: Option<Arc<dyn Fn(&PipelineContext) -> bool + Send + Sync>>,
}

impl BehaviorContribution {
    /// Create a contribution in the `Processing` phase with default
    /// placement and priority.
    pub fn new(id: impl Into<String>, behavior: Arc<dyn Behavior>) -> Self {
        let id = id.into();
        Self {
            name: behavior.name().to_owned(),
            id,
            behavior,
            phase: BehaviorPhase::Processing,
            placement: BehaviorPlacement::Anywhere,
            priority: 0,
            is_enabled: true,
            constraint: None,
        }
    }

    /// Set the phase.
    #[must_use]
    pub fn with_phase(mut self, phase: BehaviorPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Set the placement.
    #[must_use]
    pub fn with_placement(mut self, placement: BehaviorPlacement) -> Self {
        self.placement = placement;
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set a per-execution constraint.
    #[must_use]
    pub fn with_constraint(
        mut self,
        constraint: impl Fn(&PipelineContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.constraint = Some(Arc::new(constraint));
        self
    }

    /// Disable the contribution.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }

    fn applies(&self, ctx: &PipelineContext) -> bool {
        self.is_enabled
            && self
                .constraint
                .as_ref()
                .is_none_or(|constraint| constraint(ctx))
    }
}

impl std::fmt::Debug for BehaviorContribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorContribution")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("placement", &self.placement)
            .field("priority", &self.priority)
            .field("is_enabled", &self.is_enabled)
            .finish_non_exhaustive()
    }
}

/// Resolve contributions into the total execution order for one context.
///
/// Within each phase (`PreProcessing < Processing < PostProcessing`):
/// `Replace(id)` drops the referenced contribution and adopts its placement
/// and priority; `First` entries prepend in priority order; `Last` entries
/// append in priority order; `Before(id)`/`After(id)` insert at the
/// referenced position with priority breaking ties; everything else sorts
/// by ascending priority, stable in registration order. A `Before`/`After`
/// whose target is missing appends at the end of the phase.
#[must_use]
pub fn resolve_order(
    contributions: &[BehaviorContribution],
    ctx: &PipelineContext,
) -> Vec<Arc<dyn Behavior>> {
    let mut phases: Vec<Vec<BehaviorContribution>> = vec![Vec::new(), Vec::new(), Vec::new()];
    for contribution in contributions {
        if contribution.applies(ctx) {
            let slot = match contribution.phase {
                BehaviorPhase::PreProcessing => 0,
                BehaviorPhase::Processing => 1,
                BehaviorPhase::PostProcessing => 2,
            };
            phases[slot].push(contribution.clone());
        }
    }

    let mut ordered = Vec::new();
    for phase in &mut phases {
        resolve_phase(phase);
        ordered.extend(phase.iter().map(|c| Arc::clone(&c.behavior)));
    }
    ordered
}

fn resolve_phase(contributions: &mut Vec<BehaviorContribution>) {
    // Replace(id): drop the target, adopt its slot in the ordering.
    let mut index = 0;
    while index < contributions.len() {
        if let BehaviorPlacement::Replace(target) = contributions[index].placement.clone() {
            let target_index = contributions.iter().position(|c| {
                c.id == target && !matches!(c.placement, BehaviorPlacement::Replace(_))
            });
            match target_index {
                Some(target_index) if target_index != index => {
                    let target_contribution = contributions.remove(target_index);
                    if target_index < index {
                        index -= 1;
                    }
                    contributions[index].placement = target_contribution.placement;
                    contributions[index].priority = target_contribution.priority;
                }
                _ => contributions[index].placement = BehaviorPlacement::Anywhere,
            }
        }
        index += 1;
    }

    let mut firsts = Vec::new();
    let mut lasts = Vec::new();
    let mut befores = Vec::new();
    let mut afters = Vec::new();
    let mut base = Vec::new();
    for contribution in contributions.drain(..) {
        match contribution.placement.clone() {
            BehaviorPlacement::First => firsts.push(contribution),
            BehaviorPlacement::Last => lasts.push(contribution),
            BehaviorPlacement::Before(target) => befores.push((target, contribution)),
            BehaviorPlacement::After(target) => afters.push((target, contribution)),
            BehaviorPlacement::Anywhere | BehaviorPlacement::Replace(_) => {
                base.push(contribution);
            }
        }
    }

    base.sort_by_key(|c| c.priority);
    firsts.sort_by_key(|c| c.priority);
    lasts.sort_by_key(|c| c.priority);

    let mut resolved: Vec<BehaviorContribution> = firsts;
    resolved.extend(base);
    resolved.extend(lasts);

    // Before(id): ascending priority inserts keep lower priorities closer
    // to the front of the run they form.
    befores.sort_by_key(|(_, c)| c.priority);
    for (target, contribution) in befores {
        match resolved.iter().position(|c| c.id == target) {
            Some(position) => resolved.insert(position, contribution),
            None => resolved.push(contribution),
        }
    }
    // After(id): descending priority inserts so the run reads in ascending
    // priority order after the target.
    afters.sort_by_key(|(_, c)| std::cmp::Reverse(c.priority));
    for (target, contribution) in afters {
        match resolved.iter().position(|c| c.id == target) {
            Some(position) => resolved.insert(position + 1, contribution),
            None => resolved.push(contribution),
        }
    }

    *contributions = resolved;
}

/// Behavior that re-invokes the continuation per a retry policy's budget
/// and backoff.
pub struct RetryBehavior {
    policy: Arc<RetryPolicy>,
}

impl RetryBehavior {
    /// Retry the continuation per `policy`'s `max_retries` and delays.
    #[must_use]
    pub fn new(policy: Arc<RetryPolicy>) -> Self {
        Self { policy }
    }

    /// Convenience constructor with a fixed delay.
    #[must_use]
    pub fn fixed(max_retries: usize, delay: Duration) -> Self {
        Self::new(Arc::new(RetryPolicy::with_config(
            "pipeline-retry",
            conduit_resilience::RetryConfig::fixed(max_retries, delay),
        )))
    }
}

#[async_trait]
impl Behavior for RetryBehavior {
    fn name(&self) -> &str {
        "WithRetry"
    }

    async fn execute(
        &self,
        ctx: Arc<PipelineContext>,
        next: Next<'_>,
    ) -> PipelineResult<AnyValue> {
        let max_retries = self.policy.config().max_retries;
        let mut retries = 0usize;
        loop {
            match next.proceed(Arc::clone(&ctx)).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let retryable = !matches!(
                        error,
                        PipelineError::Cancelled | PipelineError::Rejected { .. }
                    );
                    if !retryable {
                        return Err(error);
                    }
                    if retries >= max_retries {
                        return if max_retries == 0 {
                            Err(error)
                        } else {
                            Err(PipelineError::retry_exhausted(retries, error))
                        };
                    }
                    retries += 1;
                    let delay = self.policy.calculate_delay(retries);
                    debug!(retry = retries, delay_ms = delay.as_millis() as u64, "retrying chain");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Behavior that races the continuation against a deadline.
pub struct TimeoutBehavior {
    duration: Duration,
}

impl TimeoutBehavior {
    /// Enforce `duration` over the rest of the chain.
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Behavior for TimeoutBehavior {
    fn name(&self) -> &str {
        "WithTimeout"
    }

    async fn execute(
        &self,
        ctx: Arc<PipelineContext>,
        next: Next<'_>,
    ) -> PipelineResult<AnyValue> {
        match tokio::time::timeout(self.duration, next.proceed(ctx)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(PipelineError::Timeout {
                duration: self.duration,
                stage: None,
            }),
        }
    }
}
