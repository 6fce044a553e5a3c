//! Expiry-aware memoizing cache with stale-on-error fallback
//!
//! Values come from a fetch that reports its own expiry. A fresh entry is
//! served without calling the fetch again; an expired entry triggers a
//! refresh, and if that refresh fails with a recoverable error the expired
//! value is served instead. Capacity is bounded and the oldest inserted entry
//! is evicted first (reads never reorder entries).
//!
//! The lock is never held while a fetch is in flight, and an entry is only
//! written after its fetch has completed.

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize { 1000 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

/// A value together with the instant it stops being fresh
#[derive(Debug, Clone, PartialEq)]
pub struct Expiring<V> {
    pub value: V,
    pub expires_at: DateTime<Utc>,
}

impl<V> Expiring<V> {
    pub fn new(value: V, expires_at: DateTime<Utc>) -> Self {
        Self { value, expires_at }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Errors that decide whether a stale value may stand in for a failed refresh
pub trait StaleFallback {
    /// `true` for transient failures (timeouts, outages); `false` for
    /// definitive answers that must evict the stale entry
    fn allows_stale(&self) -> bool;
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_served: AtomicU64,
    evictions: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_served: u64,
    pub evictions: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded, expiry-aware cache keyed by the arguments of the wrapped call
pub struct ResilientCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, Expiring<V>>>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl<K, V> ResilientCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache reading the system clock
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache with an injected clock
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            clock,
            counters: Counters::default(),
        }
    }

    /// Return the cached value for `key` if it is still fresh, otherwise run
    /// `fetch` and cache its result
    ///
    /// When `fetch` fails and an earlier value exists for `key`, the earlier
    /// value is returned if the error allows it; otherwise the entry is
    /// dropped and the error propagated.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Expiring<V>, E>>,
        E: StaleFallback + std::fmt::Display,
    {
        let previous = self.entries.lock().peek(&key).cloned();

        if let Some(entry) = &previous {
            if entry.is_fresh(self.clock.now()) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.value.clone());
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        match fetch().await {
            Ok(fresh) => {
                let value = fresh.value.clone();
                self.insert(key, fresh);
                Ok(value)
            }
            Err(err) => match previous {
                Some(stale) if err.allows_stale() => {
                    warn!("Refresh failed, serving stale entry: {}", err);
                    self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
                    Ok(stale.value)
                }
                Some(stale) => {
                    debug!("Refresh failed definitively, dropping entry: {}", err);
                    let mut entries = self.entries.lock();
                    // Another caller may have committed a fresh value meanwhile
                    if entries
                        .peek(&key)
                        .is_some_and(|current| current.expires_at == stale.expires_at)
                    {
                        entries.pop(&key);
                    }
                    Err(err)
                }
                None => Err(err),
            },
        }
    }

    /// Fresh value for `key`, without fetching
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        self.entries
            .lock()
            .peek(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone())
    }

    /// Store a value, evicting the oldest entry when full
    pub fn insert(&self, key: K, entry: Expiring<V>) {
        let evicted = self.entries.lock().push(key.clone(), entry);

        if let Some((evicted_key, _)) = evicted {
            if evicted_key != key {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("Cache full, evicted oldest entry");
            }
        }
    }

    /// Remove a single entry
    pub fn invalidate(&self, key: &K) {
        self.entries.lock().pop(key);
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether `key` has an entry, fresh or stale
    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains(key)
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stale_served: self.counters.stale_served.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: entries.len(),
            capacity: entries.cap().get(),
        }
    }

    /// Bind a fetch function to this cache
    pub fn wrap<F, Fut, E>(self, fetch: F) -> CachedFn<K, V, F, E>
    where
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<Expiring<V>, E>>,
        E: StaleFallback + std::fmt::Display,
    {
        CachedFn {
            cache: self,
            fetch,
            _error: PhantomData,
        }
    }
}

/// A fetch function memoized through a [`ResilientCache`]
pub struct CachedFn<K: Hash + Eq, V, F, E> {
    cache: ResilientCache<K, V>,
    fetch: F,
    _error: PhantomData<fn() -> E>,
}

impl<K, V, F, Fut, E> CachedFn<K, V, F, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<Expiring<V>, E>>,
    E: StaleFallback + std::fmt::Display,
{
    pub async fn call(&self, args: K) -> Result<V, E> {
        let fetch_args = args.clone();
        self.cache
            .get_or_fetch(args, || (self.fetch)(fetch_args))
            .await
    }

    pub fn cache(&self) -> &ResilientCache<K, V> {
        &self.cache
    }
}
