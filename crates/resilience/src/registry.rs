//! Named policy storage and left-to-right composition.

use dashmap::DashMap;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ResilienceError, ResilienceResult};
use crate::metrics::PolicyMetricsSnapshot;
use crate::policy::{ResiliencePattern, ResiliencePolicy};

/// Thread-safe map from name to policy.
///
/// Composition is a right-fold: the last name in the list wraps the
/// operation first, so `execute_composed(["outer", "inner"], op)` behaves
/// like `outer.execute(|| inner.execute(op))`.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    policies: DashMap<String, Arc<ResiliencePolicy>>,
}

impl PolicyRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a policy, refusing duplicates. Returns `false` when a policy
    /// with the same name already exists.
    pub fn add(&self, policy: impl Into<ResiliencePolicy>) -> bool {
        let policy = policy.into();
        match self.policies.entry(policy.name().to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(policy));
                true
            }
        }
    }

    /// Add or overwrite a policy.
    pub fn register(&self, policy: impl Into<ResiliencePolicy>) {
        let policy = policy.into();
        self.policies
            .insert(policy.name().to_owned(), Arc::new(policy));
    }

    /// Look up a policy by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ResiliencePolicy>> {
        self.policies.get(name).map(|entry| Arc::clone(&entry))
    }

    /// Look up a policy by name, failing with
    /// [`ResilienceError::PolicyNotFound`] on a miss.
    pub fn get_required(&self, name: &str) -> ResilienceResult<Arc<ResiliencePolicy>> {
        self.get(name).ok_or_else(|| ResilienceError::PolicyNotFound {
            name: name.to_owned(),
        })
    }

    /// Remove a policy. Returns `true` when one was present.
    pub fn remove(&self, name: &str) -> bool {
        self.policies.remove(name).is_some()
    }

    /// Remove every policy.
    pub fn clear(&self) {
        self.policies.clear();
    }

    /// Number of registered policies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Registered policy names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.policies.iter().map(|entry| entry.key().clone()).collect()
    }

    /// All policies implementing `pattern`.
    #[must_use]
    pub fn get_by_pattern(&self, pattern: ResiliencePattern) -> Vec<Arc<ResiliencePolicy>> {
        self.policies
            .iter()
            .filter(|entry| entry.pattern() == pattern)
            .map(|entry| Arc::clone(&entry))
            .collect()
    }

    /// Execute an operation under the named policy.
    pub async fn execute<T, F, Fut>(&self, name: &str, operation: F) -> ResilienceResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = ResilienceResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let policy = self.get_required(name)?;
        policy.execute(operation).await
    }

    /// Execute an operation under the named policies, outermost first.
    ///
    /// All names resolve before anything runs; an unknown name fails the
    /// whole call with `PolicyNotFound`. An empty list is a pass-through.
    pub async fn execute_composed<T, F, Fut>(
        &self,
        names: &[&str],
        operation: F,
    ) -> ResilienceResult<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResilienceResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let policies: Vec<Arc<ResiliencePolicy>> = names
            .iter()
            .map(|name| self.get_required(name))
            .collect::<ResilienceResult<_>>()?;
        let policies: Arc<[Arc<ResiliencePolicy>]> = policies.into();
        let operation: BoxedOperation<T> =
            Arc::new(move || Box::pin(operation()) as BoxFuture<'static, ResilienceResult<T>>);
        run_chain(policies, 0, operation).await
    }

    /// Snapshot every policy's metrics, keyed by name.
    #[must_use]
    pub fn get_all_metrics(&self) -> HashMap<String, PolicyMetricsSnapshot> {
        self.policies
            .iter()
            .map(|entry| (entry.key().clone(), entry.metrics()))
            .collect()
    }

    /// Reset every policy.
    pub fn reset_all(&self) {
        for entry in &self.policies {
            entry.reset();
        }
    }
}

type BoxedOperation<T> =
    Arc<dyn Fn() -> BoxFuture<'static, ResilienceResult<T>> + Send + Sync>;

fn run_chain<T: Send + 'static>(
    policies: Arc<[Arc<ResiliencePolicy>]>,
    index: usize,
    operation: BoxedOperation<T>,
) -> BoxFuture<'static, ResilienceResult<T>> {
    Box::pin(async move {
        let Some(head) = policies.get(index).cloned() else {
            return operation().await;
        };
        head.execute(move || run_chain(Arc::clone(&policies), index + 1, Arc::clone(&operation)))
            .await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::{
        Bulkhead, RateLimiter, RateLimiterConfig, RetryConfig, RetryPolicy, TimeoutPolicy,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn test_add_refuses_duplicates() {
        let registry = PolicyRegistry::new();
        assert!(registry.add(TimeoutPolicy::new("t", Duration::from_secs(1))));
        assert!(!registry.add(TimeoutPolicy::new("t", Duration::from_secs(2))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_overwrites() {
        let registry = PolicyRegistry::new();
        registry.register(TimeoutPolicy::new("t", Duration::from_secs(1)));
        registry.register(Bulkhead::new("t", 4));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("t").unwrap().pattern(),
            ResiliencePattern::Bulkhead
        );
    }

    #[test]
    fn test_get_required_misses_with_policy_not_found() {
        let registry = PolicyRegistry::new();
        let err = registry.get_required("missing").unwrap_err();
        assert!(matches!(err, ResilienceError::PolicyNotFound { ref name } if name == "missing"));
    }

    #[test]
    fn test_get_by_pattern_filters() {
        let registry = PolicyRegistry::new();
        registry.register(Bulkhead::new("a", 4));
        registry.register(Bulkhead::new("b", 8));
        registry.register(TimeoutPolicy::new("c", Duration::from_secs(1)));

        let bulkheads = registry.get_by_pattern(ResiliencePattern::Bulkhead);
        assert_eq!(bulkheads.len(), 2);
    }

    #[tokio::test]
    async fn test_execute_by_name() {
        let registry = PolicyRegistry::new();
        registry.register(TimeoutPolicy::new("t", Duration::from_secs(1)));
        let result = registry
            .execute("t", || async { Ok::<_, ResilienceError>(3) })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_composed_empty_list_is_pass_through() {
        let registry = PolicyRegistry::new();
        let result = registry
            .execute_composed(&[], || async { Ok::<_, ResilienceError>(9) })
            .await;
        assert_eq!(result.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_composed_unknown_name_fails_before_running() {
        let registry = PolicyRegistry::new();
        let ran = Arc::new(AtomicU32::new(0));
        let ran_in = Arc::clone(&ran);
        let err = registry
            .execute_composed(&["missing"], move || {
                let ran = Arc::clone(&ran_in);
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ResilienceError>(())
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::PolicyNotFound { .. }));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_composed_outer_retry_reruns_inner_chain() {
        let registry = PolicyRegistry::new();
        registry.register(RetryPolicy::with_config(
            "retry",
            RetryConfig::fixed(2, Duration::from_millis(1)),
        ));
        registry.register(TimeoutPolicy::new("timeout", Duration::from_secs(1)));

        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        let result = registry
            .execute_composed(&["retry", "timeout"], move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ResilienceError::application("flaky", true))
                    } else {
                        Ok(11)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 11);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // The inner timeout policy saw every attempt.
        assert_eq!(registry.get("timeout").unwrap().metrics().total, 3);
    }

    #[tokio::test]
    async fn test_composed_matches_manual_nesting() {
        let registry = PolicyRegistry::new();
        registry.register(RateLimiter::with_config(
            "limit",
            RateLimiterConfig {
                max_permits: 1,
                window: Duration::from_secs(60),
                queue_limit: 0,
                segments_per_window: 4,
            },
        ));
        registry.register(TimeoutPolicy::new("timeout", Duration::from_secs(1)));

        // First call consumes the only permit, second is rejected by the
        // outer limiter before the inner timeout runs.
        registry
            .execute_composed(&["limit", "timeout"], || async {
                Ok::<_, ResilienceError>(())
            })
            .await
            .unwrap();
        let err = registry
            .execute_composed(&["limit", "timeout"], || async {
                Ok::<_, ResilienceError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::RateLimited { .. }));
        assert_eq!(registry.get("timeout").unwrap().metrics().total, 1);
    }

    #[test]
    fn test_metrics_aggregation_and_reset() {
        let registry = PolicyRegistry::new();
        registry.register(Bulkhead::new("a", 4));
        registry.register(TimeoutPolicy::new("b", Duration::from_secs(1)));

        let metrics = registry.get_all_metrics();
        assert_eq!(metrics.len(), 2);
        assert!(metrics.contains_key("a"));

        registry.reset_all();
        assert_eq!(registry.get("a").unwrap().metrics().total, 0);
    }
}
