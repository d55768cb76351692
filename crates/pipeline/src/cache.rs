//! TTL cache with bounded size and pluggable eviction.
//!
//! Entries carry access bookkeeping so every declared policy is a true
//! eviction: when an insert pushes the cache over `max_size`, expired
//! entries go first, then victims are selected by the policy until the
//! bound holds again. The entry that triggered the eviction is never its
//! victim.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Victim selection policy for a full cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Least recently accessed first.
    Lru,
    /// Least frequently accessed first.
    Lfu,
    /// Oldest inserted first.
    Fifo,
    /// Closest to expiry first.
    Ttl,
}

/// One cached value with bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value.
    pub value: V,
    /// When the entry stops being served.
    pub expires_at: Instant,
    /// When the entry was inserted.
    pub created_at: Instant,
    /// When the entry was last read.
    pub last_accessed: Instant,
    /// How many times the entry was read.
    pub access_count: u64,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: now + ttl,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl,
        }
    }

    /// Whether the entry has passed its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Bounded concurrent cache keyed by string.
#[derive(Debug)]
pub struct PipelineCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    max_size: usize,
    policy: EvictionPolicy,
    refresh_on_access: bool,
}

impl<V: Clone> PipelineCache<V> {
    /// Create a cache bounded to `max_size` entries.
    #[must_use]
    pub fn new(max_size: usize, policy: EvictionPolicy) -> Self {
        Self {
            entries: DashMap::new(),
            max_size: max_size.max(1),
            policy,
            refresh_on_access: false,
        }
    }

    /// Extend an entry's TTL on every hit.
    #[must_use]
    pub fn with_refresh_on_access(mut self) -> Self {
        self.refresh_on_access = true;
        self
    }

    /// Look up a non-expired entry, updating its access bookkeeping.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entry = self.entries.get_mut(key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        let now = Instant::now();
        entry.last_accessed = now;
        entry.access_count += 1;
        if self.refresh_on_access {
            entry.expires_at = now + entry.ttl;
        }
        Some(entry.value.clone())
    }

    /// Insert a value, evicting per policy when the bound is exceeded.
    pub fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        self.entries.insert(key.clone(), CacheEntry::new(value, ttl));
        self.enforce_bound(&key);
    }

    /// Remove an entry.
    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Current entry count, expired entries included until swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries.
    pub fn sweep_expired(&self) {
        self.entries.retain(|_, entry| !entry.is_expired());
    }

    fn enforce_bound(&self, protected: &str) {
        if self.entries.len() <= self.max_size {
            return;
        }
        // Expired entries are free wins regardless of policy.
        self.entries
            .retain(|key, entry| key == protected || !entry.is_expired());

        while self.entries.len() > self.max_size {
            let victim = self.select_victim(protected);
            match victim {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    fn select_victim(&self, protected: &str) -> Option<String> {
        let candidates = self
            .entries
            .iter()
            .filter(|entry| entry.key() != protected);
        let victim = match self.policy {
            EvictionPolicy::Lru => {
                candidates.min_by_key(|entry| entry.last_accessed)
            }
            EvictionPolicy::Lfu => {
                candidates.min_by_key(|entry| (entry.access_count, entry.created_at))
            }
            EvictionPolicy::Fifo => candidates.min_by_key(|entry| entry.created_at),
            EvictionPolicy::Ttl => candidates.min_by_key(|entry| entry.expires_at),
        };
        victim.map(|entry| entry.key().clone())
    }
}
