//! Cross-pattern integration scenarios.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use conduit_resilience::{
    Bulkhead, CircuitBreaker, CircuitBreakerConfig, CircuitState, PolicyRegistry, RateLimiter,
    RateLimiterConfig, ResilienceError, TimeoutPolicy,
};

#[tokio::test]
async fn breaker_trips_on_failure_window_then_admits_probe() {
    let cb = CircuitBreaker::with_config(
        "downstream",
        CircuitBreakerConfig {
            failure_rate_threshold: 0.5,
            minimum_throughput: 4,
            sampling_window: Duration::from_secs(10),
            break_duration: Duration::from_millis(100),
        },
    );

    // Four failures fill the window and trip the breaker.
    for _ in 0..4 {
        let _ = cb
            .execute(|| async { Err::<(), _>(ResilienceError::application("down", true)) })
            .await;
    }
    assert_eq!(cb.state(), CircuitState::Open);

    // Call five is shed, not executed.
    let ran = Arc::new(AtomicU32::new(0));
    let ran_in = Arc::clone(&ran);
    let err = cb
        .execute(move || {
            let ran = Arc::clone(&ran_in);
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ResilienceError::CircuitOpen { .. }));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(cb.metrics().rejected, 1);

    // After the break a probe is admitted and a success closes the circuit.
    tokio::time::sleep(Duration::from_millis(120)).await;
    cb.execute(|| async { Ok(()) }).await.unwrap();
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test]
async fn rate_limiter_admits_queues_and_rejects() {
    let rl = Arc::new(RateLimiter::with_config(
        "api",
        RateLimiterConfig {
            max_permits: 2,
            window: Duration::from_millis(100),
            queue_limit: 1,
            segments_per_window: 4,
        },
    ));

    // Two immediate admissions exhaust the window.
    rl.execute(|| async { Ok::<_, ResilienceError>(()) })
        .await
        .unwrap();
    rl.execute(|| async { Ok::<_, ResilienceError>(()) })
        .await
        .unwrap();

    // Third caller queues.
    let rl_queued = Arc::clone(&rl);
    let queued = tokio::spawn(async move {
        rl_queued
            .execute(|| async { Ok::<_, ResilienceError>("queued") })
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(rl.queued(), 1);

    // Fourth caller finds the queue full and is rejected.
    let err = rl
        .execute(|| async { Ok::<_, ResilienceError>(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, ResilienceError::RateLimited { .. }));

    // The queued caller is admitted once the window turns over.
    let admitted = tokio::time::timeout(Duration::from_millis(500), queued)
        .await
        .expect("queued caller should be admitted")
        .unwrap();
    assert_eq!(admitted.unwrap(), "queued");

    let snapshot = rl.metrics();
    assert_eq!(snapshot.successful, 3);
    assert_eq!(snapshot.rejected, 1);
}

#[tokio::test]
async fn composed_execution_equals_manual_nesting() {
    let registry = PolicyRegistry::new();
    let outer = CircuitBreaker::new("outer");
    outer.isolate();
    registry.register(outer);
    registry.register(TimeoutPolicy::new("inner", Duration::from_secs(1)));

    let ran = Arc::new(AtomicU32::new(0));
    let ran_in = Arc::clone(&ran);
    let composed = registry
        .execute_composed(&["outer", "inner"], move || {
            let ran = Arc::clone(&ran_in);
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

    // The isolated outer breaker sheds the call before the inner policy or
    // the operation run — exactly what outer.execute(|| inner.execute(op))
    // would do.
    assert!(matches!(
        composed.unwrap_err(),
        ResilienceError::CircuitOpen { .. }
    ));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(registry.get("inner").unwrap().metrics().total, 0);

    let manual_outer = CircuitBreaker::new("manual-outer");
    manual_outer.isolate();
    let manual_inner = TimeoutPolicy::new("manual-inner", Duration::from_secs(1));
    let manual = manual_outer
        .execute(|| manual_inner.execute(|| async { Ok(()) }))
        .await;
    assert!(matches!(
        manual.unwrap_err(),
        ResilienceError::CircuitOpen { .. }
    ));
}

#[tokio::test]
async fn bulkhead_and_timeout_compose_through_registry() {
    let registry = PolicyRegistry::new();
    registry.register(Bulkhead::new("slots", 2));
    registry.register(TimeoutPolicy::new("deadline", Duration::from_millis(50)));

    // The inner deadline fires while the outer bulkhead stays healthy.
    let err = registry
        .execute_composed(&["slots", "deadline"], || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ResilienceError::Timeout { .. }));

    let slots = registry.get("slots").unwrap().metrics();
    assert_eq!(slots.rejected, 0);
    assert_eq!(slots.failed, 1);
}
