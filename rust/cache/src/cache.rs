use crate::CacheConfig;
use parking_lot::Mutex;
use serde::Serialize;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counter snapshot for one cache instance. `hit_rate` is
/// `hits / (hits + misses)`, or 0.0 before the first lookup, so
/// `hit_rate + miss_rate == 1` over any window with at least one lookup.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

struct Entry<V> {
    value: V,
    touched: Instant,
}

/// A strict least-recently-used cache with optional idle expiry.
///
/// Capacity evictions and idle expiries increment the eviction counter;
/// explicit [`LruCache::invalidate`] does not, so stats distinguish entries
/// the cache chose to drop from entries the caller removed.
pub struct LruCache<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    inner: Mutex<lru::LruCache<K, Entry<V>>>,
    time_to_idle: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(config: &CacheConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.max_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        LruCache {
            inner: Mutex::new(lru::LruCache::new(capacity)),
            time_to_idle: config.time_to_idle,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        if let Some(ttl) = self.time_to_idle {
            let expired = inner
                .peek(key)
                .map(|entry| entry.touched.elapsed() > ttl)
                .unwrap_or(false);
            if expired {
                inner.pop(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }
        match inner.get_mut(key) {
            Some(entry) => {
                entry.touched = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let evicted = inner.push(
            key.clone(),
            Entry {
                value,
                touched: Instant::now(),
            },
        );
        // push returns the displaced pair: same key means a replace, a
        // different key means the LRU entry fell out.
        if let Some((old_key, _)) = evicted {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Removes an entry without counting it as an eviction.
    pub fn invalidate(&self, key: &K) {
        self.inner.lock().pop(key);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            size: self.len(),
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}
