//! Keyed caching wrapper with single-flight computation.

use async_trait::async_trait;
use dashmap::DashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{EvictionPolicy, PipelineCache};
use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::pipeline::Pipeline;

/// Caches inner-pipeline outputs by a key extracted from the input.
///
/// A key-scoped critical section with a double-check guarantees at most
/// one in-flight computation per key: concurrent callers for the same key
/// wait for the first to publish and then read its result. Failures are
/// never cached. See
/// [`PipelineExt::with_cache`](crate::pipeline::PipelineExt::with_cache).
pub struct CachingPipeline<P, KeyF, Out> {
    name: String,
    inner: P,
    key_fn: KeyF,
    ttl: Duration,
    cache: PipelineCache<Out>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    _marker: PhantomData<fn() -> Out>,
}

impl<P, KeyF, Out> CachingPipeline<P, KeyF, Out>
where
    Out: Clone + Send + Sync + 'static,
{
    /// Cache `inner` outputs under `key_fn` for `ttl`, bounded to 1024
    /// entries with LRU eviction.
    pub fn new<In>(inner: P, key_fn: KeyF, ttl: Duration) -> Self
    where
        P: Pipeline<In, Out>,
        KeyF: Fn(&In) -> String + Send + Sync,
        In: Send + 'static,
    {
        Self::with_capacity(inner, key_fn, ttl, 1024, EvictionPolicy::Lru)
    }

    /// Cache with an explicit entry bound and eviction policy.
    pub fn with_capacity<In>(
        inner: P,
        key_fn: KeyF,
        ttl: Duration,
        max_size: usize,
        policy: EvictionPolicy,
    ) -> Self
    where
        P: Pipeline<In, Out>,
        KeyF: Fn(&In) -> String + Send + Sync,
        In: Send + 'static,
    {
        Self {
            name: format!("Cached({})", inner.name()),
            inner,
            key_fn,
            ttl,
            cache: PipelineCache::new(max_size, policy),
            locks: DashMap::new(),
            _marker: PhantomData,
        }
    }

    /// Extend an entry's TTL on each hit.
    #[must_use]
    pub fn refresh_on_access(mut self) -> Self {
        self.cache = self.cache.with_refresh_on_access();
        self
    }

    /// Current number of cached entries.
    #[must_use]
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    /// Drop one key's entry.
    pub fn invalidate(&self, key: &str) {
        self.cache.remove(key);
    }
}

#[async_trait]
impl<In, Out, P, KeyF> Pipeline<In, Out> for CachingPipeline<P, KeyF, Out>
where
    P: Pipeline<In, Out>,
    KeyF: Fn(&In) -> String + Send + Sync,
    In: Send + 'static,
    Out: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_with_context(
        &self,
        input: In,
        ctx: Arc<PipelineContext>,
    ) -> PipelineResult<Out> {
        let key = (self.key_fn)(&input);
        if let Some(hit) = self.cache.get(&key) {
            debug!(pipeline = %self.name, key = %key, "cache hit");
            return Ok(hit);
        }

        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Double-check: the first holder may have published while we
        // waited for the key lock.
        if let Some(hit) = self.cache.get(&key) {
            debug!(pipeline = %self.name, key = %key, "cache hit after wait");
            return Ok(hit);
        }

        let value = self.inner.execute_with_context(input, ctx).await?;
        self.cache.insert(key, value.clone(), self.ttl);
        Ok(value)
    }
}
