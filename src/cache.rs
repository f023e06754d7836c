//! Shared TTL cache with single-flight loading
//!
//! Read-mostly caches (token bindings, wallet validation) share this map.
//! On a miss, at most one caller runs the loader per key; concurrent callers
//! for the same key wait on the in-flight load instead of stampeding the
//! backing source. Entries carry their own TTL so negative results can
//! expire faster than positive ones.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::Result;

#[derive(Clone)]
struct Entry<V> {
    value: V,
    cached_at: Instant,
    ttl: Duration,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Concurrent map with per-entry expiry and per-key load serialization
pub struct TtlCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    inflight: DashMap<K, Arc<Mutex<()>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
        }
    }

    /// Get a live entry, removing it if expired
    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Some(entry.value.clone());
            }
            drop(entry);
            self.entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key,
            Entry {
                value,
                cached_at: Instant::now(),
                ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Get the cached value or run `loader` to fill it, with at most one
    /// in-flight load per key. `ttl_of` picks the TTL from the loaded value
    /// (shorter for negative results). Loader errors are not cached.
    pub async fn get_or_load<F, Fut, T>(&self, key: K, ttl_of: T, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V>>,
        T: Fn(&V) -> Duration,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let lock = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have filled the entry while we waited
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let result = loader().await;
        if let Ok(ref value) = result {
            self.insert(key.clone(), value.clone(), ttl_of(value));
        }
        drop(_guard);
        self.inflight.remove(&key);
        result
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
