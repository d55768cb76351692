//! Stage-level circuit breaker decorator.
//!
//! A consecutive-failure breaker, simpler than the windowed policy in
//! `conduit-resilience`: `failure_threshold` consecutive failures open the
//! circuit for `break_duration`; the next call after the break runs as a
//! half-open probe. One probe success closes the circuit, one failure
//! re-opens it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::stage::Stage;

/// Stage-level circuit states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageCircuitState {
    /// Calls flow through.
    Closed,
    /// Calls fail fast.
    Open,
    /// One probe in flight.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: StageCircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
}

/// Consecutive-failure circuit breaker around a stage.
pub struct CircuitBreakerStage<S> {
    name: String,
    inner_name: String,
    inner: S,
    failure_threshold: usize,
    break_duration: Duration,
    state: Mutex<BreakerState>,
}

impl<S> CircuitBreakerStage<S> {
    /// Wrap `inner`; `failure_threshold` consecutive failures open the
    /// circuit for `break_duration`.
    pub fn new<In, Out>(inner: S, failure_threshold: usize, break_duration: Duration) -> Self
    where
        S: Stage<In, Out>,
        In: Send + 'static,
        Out: Send + 'static,
    {
        let inner_name = inner.name().to_owned();
        Self {
            name: format!("{inner_name} (CircuitBreaker)"),
            inner_name,
            inner,
            failure_threshold: failure_threshold.max(1),
            break_duration,
            state: Mutex::new(BreakerState {
                state: StageCircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Current circuit state.
    #[must_use]
    pub fn state(&self) -> StageCircuitState {
        self.state.lock().state
    }

    fn try_acquire(&self) -> PipelineResult<()> {
        let mut state = self.state.lock();
        match state.state {
            StageCircuitState::Closed => Ok(()),
            StageCircuitState::Open => {
                let opened_at = state.opened_at.unwrap_or_else(Instant::now);
                let since_open = opened_at.elapsed();
                if since_open >= self.break_duration {
                    state.state = StageCircuitState::HalfOpen;
                    info!(stage = %self.inner_name, "circuit breaker admitting probe");
                    Ok(())
                } else {
                    Err(PipelineError::rejected(
                        &self.name,
                        self.break_duration.checked_sub(since_open),
                    ))
                }
            }
            StageCircuitState::HalfOpen => Err(PipelineError::rejected(&self.name, None)),
        }
    }

    fn record(&self, success: bool) {
        let mut state = self.state.lock();
        if success {
            state.state = StageCircuitState::Closed;
            state.consecutive_failures = 0;
            state.opened_at = None;
            return;
        }
        match state.state {
            StageCircuitState::HalfOpen => {
                state.state = StageCircuitState::Open;
                state.opened_at = Some(Instant::now());
                warn!(stage = %self.inner_name, "circuit re-opened after failed probe");
            }
            StageCircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.failure_threshold {
                    state.state = StageCircuitState::Open;
                    state.opened_at = Some(Instant::now());
                    warn!(
                        stage = %self.inner_name,
                        consecutive_failures = state.consecutive_failures,
                        "circuit opened"
                    );
                }
            }
            StageCircuitState::Open => {}
        }
    }
}

#[async_trait]
impl<In, Out, S> Stage<In, Out> for CircuitBreakerStage<S>
where
    S: Stage<In, Out>,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, input: In, ctx: &PipelineContext) -> PipelineResult<Out> {
        self.try_acquire()?;
        let result = self.inner.process(input, ctx).await;
        self.record(result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::stage_fn;
    use conduit_core::PipelineId;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn ctx() -> PipelineContext {
        PipelineContext::new(PipelineId::v4(), "test")
    }

    fn switchable() -> (impl Stage<i32, i32>, Arc<AtomicBool>) {
        let failing = Arc::new(AtomicBool::new(true));
        let failing_in = Arc::clone(&failing);
        let stage = stage_fn("Downstream", move |x: i32| {
            let failing = Arc::clone(&failing_in);
            async move {
                if failing.load(Ordering::SeqCst) {
                    Err(PipelineError::internal("down"))
                } else {
                    Ok(x)
                }
            }
        });
        (stage, failing)
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures_and_fails_fast() {
        let (inner, _failing) = switchable();
        let stage = CircuitBreakerStage::new(inner, 2, Duration::from_millis(100));
        let ctx = ctx();

        let _ = stage.process(1, &ctx).await;
        assert_eq!(stage.state(), StageCircuitState::Closed);
        let _ = stage.process(1, &ctx).await;
        assert_eq!(stage.state(), StageCircuitState::Open);

        let err = stage.process(1, &ctx).await.unwrap_err();
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn probe_success_closes_probe_failure_reopens() {
        let (inner, failing) = switchable();
        let stage = CircuitBreakerStage::new(inner, 1, Duration::from_millis(20));
        let ctx = ctx();

        let _ = stage.process(1, &ctx).await;
        assert_eq!(stage.state(), StageCircuitState::Open);

        // Failed probe re-opens.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = stage.process(1, &ctx).await;
        assert_eq!(stage.state(), StageCircuitState::Open);

        // Successful probe closes.
        tokio::time::sleep(Duration::from_millis(30)).await;
        failing.store(false, Ordering::SeqCst);
        assert_eq!(stage.process(5, &ctx).await.unwrap(), 5);
        assert_eq!(stage.state(), StageCircuitState::Closed);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let (inner, failing) = switchable();
        let stage = CircuitBreakerStage::new(inner, 3, Duration::from_millis(100));
        let ctx = ctx();

        let _ = stage.process(1, &ctx).await;
        let _ = stage.process(1, &ctx).await;
        failing.store(false, Ordering::SeqCst);
        let _ = stage.process(1, &ctx).await;
        failing.store(true, Ordering::SeqCst);
        let _ = stage.process(1, &ctx).await;
        let _ = stage.process(1, &ctx).await;
        assert_eq!(stage.state(), StageCircuitState::Closed);
    }
}
