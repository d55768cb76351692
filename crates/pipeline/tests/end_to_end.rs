//! End-to-end executor and composition scenarios.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use conduit_core::{PipelineId, keys};
use conduit_pipeline::{
    BehaviorContribution, BranchPipeline, CachingPipeline, ErrorStrategy, Interceptor, Next,
    ParallelPipeline, Pipeline, PipelineBuilder, PipelineContext, PipelineError, PipelineExt,
    PipelineResult, pipeline_fn,
};

struct OrderRecorder {
    label: &'static str,
    priority: i32,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Interceptor for OrderRecorder {
    fn name(&self) -> &str {
        self.label
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn before_execution(&self, _ctx: &PipelineContext) -> PipelineResult<()> {
        self.log.lock().push(format!("before:{}", self.label));
        Ok(())
    }

    async fn after_execution(&self, _ctx: &PipelineContext) -> PipelineResult<()> {
        self.log.lock().push(format!("after:{}", self.label));
        Ok(())
    }

    async fn before_stage(&self, _ctx: &PipelineContext, stage: &str) -> PipelineResult<()> {
        self.log.lock().push(format!("before-stage:{}:{stage}", self.label));
        Ok(())
    }

    async fn after_stage(&self, _ctx: &PipelineContext, stage: &str) -> PipelineResult<()> {
        self.log.lock().push(format!("after-stage:{}:{stage}", self.label));
        Ok(())
    }
}

#[tokio::test]
async fn interceptors_fire_in_priority_order_before_and_after() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = PipelineBuilder::<i32, i32>::new("ordered")
        .stage_fn("Id", |x: i32| async move { Ok(x) })
        .interceptor(OrderRecorder {
            label: "second",
            priority: 10,
            log: Arc::clone(&log),
        })
        .interceptor(OrderRecorder {
            label: "first",
            priority: -10,
            log: Arc::clone(&log),
        })
        .build()
        .unwrap();

    pipeline.execute(1).await.unwrap();

    let log = log.lock();
    // `after*` hooks use the same ascending order as `before*`, not the
    // reverse.
    assert_eq!(
        *log,
        vec![
            "before:first",
            "before:second",
            "before-stage:first:Id",
            "before-stage:second:Id",
            "after-stage:first:Id",
            "after-stage:second:Id",
            "after:first",
            "after:second",
        ]
    );
}

#[tokio::test]
async fn stages_compose_in_declared_order_and_record_progress() {
    let pipeline = PipelineBuilder::<i32, i32>::new("staged")
        .stage_fn("AddOne", |x: i32| async move { Ok(x + 1) })
        .stage_fn("Double", |x: i32| async move { Ok(x * 2) })
        .stage_fn("Show", |x: i32| async move { Ok(format!("={x}")) })
        .build()
        .unwrap();

    let ctx = Arc::new(PipelineContext::new(PipelineId::v4(), "staged"));
    let out = pipeline
        .execute_with_context(20, Arc::clone(&ctx))
        .await
        .unwrap();
    assert_eq!(out, "=42");
    assert_eq!(ctx.last_completed_stage_index(), Some(2));
    assert_eq!(ctx.current_stage().as_deref(), Some("Show"));
}

struct PassThrough;

#[async_trait]
impl conduit_pipeline::Behavior for PassThrough {
    fn name(&self) -> &str {
        "pass-through"
    }

    async fn execute(
        &self,
        ctx: Arc<PipelineContext>,
        next: Next<'_>,
    ) -> PipelineResult<conduit_pipeline::AnyValue> {
        next.proceed(ctx).await
    }
}

#[tokio::test]
async fn pass_through_behavior_is_observationally_equivalent() {
    let bare = PipelineBuilder::<i32, i32>::new("bare")
        .stage_fn("Double", |x: i32| async move { Ok(x * 2) })
        .build()
        .unwrap();
    let wrapped = PipelineBuilder::<i32, i32>::new("wrapped")
        .stage_fn("Double", |x: i32| async move { Ok(x * 2) })
        .behavior(BehaviorContribution::new("noop", Arc::new(PassThrough)))
        .build()
        .unwrap();

    assert_eq!(bare.execute(21).await.unwrap(), wrapped.execute(21).await.unwrap());
}

// Scenario: a flaky parse pipeline behind a retry wrapper. The first two
// runs fail, the third parses "42".
#[tokio::test]
async fn retry_wrapper_turns_flaky_parse_into_success() {
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_in = Arc::clone(&attempts);
    let parse = pipeline_fn("Parse", move |s: String| {
        let attempts = Arc::clone(&attempts_in);
        async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(PipelineError::internal("transient parse outage"))
            } else {
                s.parse::<i32>()
                    .map_err(|e| PipelineError::internal_with_source("unparseable", e))
            }
        }
    });

    let pipeline = parse.with_retry(3, Duration::from_millis(10));
    assert_eq!(pipeline.execute("42".to_owned()).await.unwrap(), 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

// Scenario: branch(x > 0) routing to constants.
#[tokio::test]
async fn branch_routes_positive_and_non_positive() {
    let branch = BranchPipeline::new(
        |x: &i32| *x > 0,
        pipeline_fn("One", |_: i32| async move { Ok(1) }),
        pipeline_fn("MinusOne", |_: i32| async move { Ok(-1) }),
    );

    assert_eq!(branch.execute(5).await.unwrap(), 1);
    assert_eq!(branch.execute(-3).await.unwrap(), -1);
    assert_eq!(branch.execute(0).await.unwrap(), -1);
}

// Scenario: five concurrent callers behind one cache key compute once.
#[tokio::test]
async fn caching_pipeline_computes_once_for_concurrent_callers() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_in = Arc::clone(&counter);
    let inner = pipeline_fn("Increment", move |_: String| {
        let counter = Arc::clone(&counter_in);
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
        }
    });
    let cached = Arc::new(CachingPipeline::new(
        inner,
        |input: &String| input.clone(),
        Duration::from_secs(1),
    ));

    let callers: Vec<_> = (0..5)
        .map(|_| {
            let cached = Arc::clone(&cached);
            tokio::spawn(async move { cached.execute("k".to_owned()).await })
        })
        .collect();
    for caller in callers {
        assert_eq!(caller.await.unwrap().unwrap(), 1);
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

// Scenario: ordered parallel doubling preserves input order.
#[tokio::test]
async fn parallel_ordered_doubles_in_input_order() {
    let pipeline = ParallelPipeline::ordered(
        pipeline_fn("Double", |x: i32| async move { Ok(x * 2) }),
        2,
    );
    let results = pipeline.execute(vec![3, 1, 4, 1, 5]).await.unwrap();
    assert_eq!(results, vec![6, 2, 8, 2, 10]);
    assert_eq!(results.len(), 5);
}

struct Absorbing;

#[async_trait]
impl Interceptor for Absorbing {
    fn name(&self) -> &str {
        "absorbing"
    }

    async fn on_error(&self, ctx: &PipelineContext, _error: &PipelineError) -> bool {
        ctx.set_result(0i32);
        true
    }
}

struct CountingOnError {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Interceptor for CountingOnError {
    fn name(&self) -> &str {
        "counting"
    }

    fn priority(&self) -> i32 {
        100
    }

    async fn on_error(&self, _ctx: &PipelineContext, _error: &PipelineError) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        false
    }
}

#[tokio::test]
async fn absorbing_interceptor_short_circuits_on_error() {
    let later_calls = Arc::new(AtomicUsize::new(0));
    let pipeline = PipelineBuilder::<i32, i32>::new("absorbed")
        .stage_fn("Boom", |_: i32| async move {
            Err::<i32, _>(PipelineError::internal("boom"))
        })
        .interceptor(Absorbing)
        .interceptor(CountingOnError {
            calls: Arc::clone(&later_calls),
        })
        .build()
        .unwrap();

    let ctx = Arc::new(PipelineContext::new(PipelineId::v4(), "absorbed"));
    let out = pipeline
        .execute_with_context(1, Arc::clone(&ctx))
        .await
        .unwrap();
    assert_eq!(out, 0);
    // The absorbing interceptor ran first; later on_error hooks never did.
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    assert!(ctx.exception().is_some());
}

#[tokio::test]
async fn error_handler_supplies_the_result() {
    let pipeline = PipelineBuilder::<i32, i32>::new("handled")
        .stage_fn("Boom", |_: i32| async move {
            Err::<i32, _>(PipelineError::internal("boom"))
        })
        .build()
        .unwrap()
        .on_error(|_error, _ctx| Some(-7));

    assert_eq!(pipeline.execute(1).await.unwrap(), -7);
}

#[tokio::test]
async fn continue_strategy_returns_registered_default() {
    let pipeline = PipelineBuilder::<i32, i32>::new("continuing")
        .stage_fn("Boom", |_: i32| async move {
            Err::<i32, _>(PipelineError::internal("boom"))
        })
        .with_error_strategy(ErrorStrategy::Continue)
        .build()
        .unwrap()
        .continue_with(99);

    assert_eq!(pipeline.execute(1).await.unwrap(), 99);
}

#[tokio::test]
async fn dead_letter_strategy_tags_context_and_wraps_error() {
    let pipeline = PipelineBuilder::<i32, i32>::new("dead-lettered")
        .stage_fn("Boom", |_: i32| async move {
            Err::<i32, _>(PipelineError::internal("poison message"))
        })
        .with_error_strategy(ErrorStrategy::DeadLetter)
        .build()
        .unwrap();

    let ctx = Arc::new(PipelineContext::new(PipelineId::v4(), "dead-lettered"));
    let err = pipeline
        .execute_with_context(1, Arc::clone(&ctx))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::DeadLetter { .. }));
    assert_eq!(ctx.get_value(keys::DEAD_LETTER, false), true);
    assert!(
        ctx.get_value(keys::DEAD_LETTER_REASON, String::new())
            .contains("poison message")
    );
}

#[tokio::test]
async fn executor_cache_short_circuits_repeat_inputs() {
    let runs = Arc::new(AtomicU32::new(0));
    let runs_in = Arc::clone(&runs);
    let pipeline = PipelineBuilder::<i32, i32>::new("cached")
        .with_cache(|x: &i32| x.to_string(), Duration::from_secs(1))
        .stage_fn("Count", move |x: i32| {
            let runs = Arc::clone(&runs_in);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(x * 2)
            }
        })
        .build()
        .unwrap();

    assert_eq!(pipeline.execute(5).await.unwrap(), 10);
    assert_eq!(pipeline.execute(5).await.unwrap(), 10);
    assert_eq!(pipeline.execute(6).await.unwrap(), 12);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrency_bound_serializes_executions() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let active_in = Arc::clone(&active);
    let peak_in = Arc::clone(&peak);
    let pipeline = Arc::new(
        PipelineBuilder::<i32, i32>::new("bounded")
            .max_concurrency(1)
            .stage_fn("Track", move |x: i32| {
                let active = Arc::clone(&active_in);
                let peak = Arc::clone(&peak_in);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(x)
                }
            })
            .build()
            .unwrap(),
    );

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.execute(i).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_context_stops_the_stage_chain() {
    let pipeline = PipelineBuilder::<i32, i32>::new("cancellable")
        .stage_fn("Id", |x: i32| async move { Ok(x) })
        .build()
        .unwrap();

    let ctx = Arc::new(PipelineContext::new(PipelineId::v4(), "cancellable"));
    ctx.cancel();
    let err = pipeline.execute_with_context(1, ctx).await.unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));
}

#[tokio::test]
async fn config_timeout_bounds_the_behavior_chain() {
    let pipeline = PipelineBuilder::<i32, i32>::new("deadlined")
        .with_timeout(Duration::from_millis(10))
        .stage_fn("Slow", |x: i32| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(x)
        })
        .build()
        .unwrap();

    let err = pipeline.execute(1).await.unwrap_err();
    assert!(matches!(err, PipelineError::Timeout { .. }));
}

#[tokio::test]
async fn config_retry_reruns_the_behavior_chain() {
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_in = Arc::clone(&attempts);
    let pipeline = PipelineBuilder::<i32, i32>::new("retried")
        .with_retries(2, Duration::from_millis(1))
        .stage_fn("Flaky", move |x: i32| {
            let attempts = Arc::clone(&attempts_in);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PipelineError::internal("flaky"))
                } else {
                    Ok(x)
                }
            }
        })
        .build()
        .unwrap();

    assert_eq!(pipeline.execute(8).await.unwrap(), 8);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
