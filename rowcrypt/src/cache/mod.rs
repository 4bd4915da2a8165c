//! Bounded caches with pluggable eviction policies.
//!
//! All policies share one capability set behind [`Cache`]: get, insert,
//! remove, len, capacity, clear, close. Each implementation keeps its state
//! under a single coarse lock, giving O(1)-per-operation behavior that is
//! safe under concurrent access. An optional TTL expires idle entries
//! lazily on lookup; an optional eviction callback observes every removal.

mod lfu;
mod lru;
mod simple;
mod slru;
mod tlfu;

use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

pub use lfu::LfuCache;
pub use lru::LruCache;
pub use simple::SimpleCache;
pub use slru::SlruCache;
pub use tlfu::TlfuCache;

/// Eviction policy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Least recently used.
    Lru,
    /// Least frequently used.
    Lfu,
    /// TinyLFU: frequency-sketch-gated admission over a segmented main.
    Tlfu,
    /// Segmented LRU: probation and protected segments.
    Slru,
    /// Unbounded map, no eviction.
    Simple,
}

impl Display for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CachePolicy::Lru => write!(f, "lru"),
            CachePolicy::Lfu => write!(f, "lfu"),
            CachePolicy::Tlfu => write!(f, "tlfu"),
            CachePolicy::Slru => write!(f, "slru"),
            CachePolicy::Simple => write!(f, "simple"),
        }
    }
}

/// Called with each entry as it leaves the cache, whether evicted, removed,
/// or cleared.
pub type EvictCallback<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

/// Common capability set of all cache implementations.
pub trait Cache<K, V>: Send + Sync {
    /// Returns a clone of the cached value, refreshing its recency and
    /// frequency bookkeeping.
    fn get(&self, key: &K) -> Option<V>;

    /// Inserts a value, evicting per policy when at capacity. Returns false
    /// if the policy declined the insert.
    fn insert(&self, key: K, value: V) -> bool;

    /// Removes an entry, invoking the eviction callback if present.
    fn remove(&self, key: &K) -> bool;

    /// Number of cached entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    fn capacity(&self) -> usize;

    /// Removes all entries, invoking the eviction callback for each.
    fn clear(&self);

    /// Clears the cache and releases its resources.
    fn close(&self);
}

/// Builds a cache with a chosen policy, capacity, TTL, and eviction
/// callback.
pub struct CacheBuilder<K, V> {
    capacity: usize,
    policy: CachePolicy,
    evict_callback: Option<EvictCallback<K, V>>,
    ttl: Option<Duration>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            policy: CachePolicy::Lru,
            evict_callback: None,
            ttl: None,
        }
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_evict_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        self.evict_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn build(self) -> Arc<dyn Cache<K, V>> {
        match self.policy {
            CachePolicy::Lru => Arc::new(LruCache::new(self.capacity, self.evict_callback, self.ttl)),
            CachePolicy::Lfu => Arc::new(LfuCache::new(self.capacity, self.evict_callback, self.ttl)),
            CachePolicy::Tlfu => {
                Arc::new(TlfuCache::new(self.capacity, self.evict_callback, self.ttl))
            }
            CachePolicy::Slru => {
                Arc::new(SlruCache::new(self.capacity, self.evict_callback, self.ttl))
            }
            CachePolicy::Simple => {
                Arc::new(SimpleCache::new(self.capacity, self.evict_callback, self.ttl))
            }
        }
    }
}
