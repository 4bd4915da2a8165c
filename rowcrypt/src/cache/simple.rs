use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{Cache, EvictCallback};

struct SimpleEntry<V> {
    value: V,
    last_accessed: Instant,
}

/// Map-backed cache without eviction.
///
/// Entries stay until removed, expired by TTL, or cleared; the configured
/// capacity is reported but not enforced. Suits key caches whose population
/// is naturally bounded (one system key per service, a handful of rotations).
pub struct SimpleCache<K, V> {
    entries: Mutex<HashMap<K, SimpleEntry<V>>>,
    capacity: usize,
    evict_callback: Option<EvictCallback<K, V>>,
    ttl: Option<Duration>,
}

impl<K, V> SimpleCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        capacity: usize,
        evict_callback: Option<EvictCallback<K, V>>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
            evict_callback,
            ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, SimpleEntry<V>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify_evicted(&self, key: &K, value: &V) {
        if let Some(callback) = &self.evict_callback {
            callback(key, value);
        }
    }
}

impl<K, V> Cache<K, V> for SimpleCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.lock();

        let expired = match (self.ttl, entries.get(key)) {
            (Some(ttl), Some(entry)) => entry.last_accessed.elapsed() > ttl,
            (_, None) => return None,
            _ => false,
        };

        if expired {
            if let Some(entry) = entries.remove(key) {
                self.notify_evicted(key, &entry.value);
            }
            return None;
        }

        let entry = entries.get_mut(key)?;
        entry.last_accessed = Instant::now();
        Some(entry.value.clone())
    }

    fn insert(&self, key: K, value: V) -> bool {
        self.lock().insert(
            key,
            SimpleEntry {
                value,
                last_accessed: Instant::now(),
            },
        );
        true
    }

    fn remove(&self, key: &K) -> bool {
        let mut entries = self.lock();
        if let Some(entry) = entries.remove(key) {
            self.notify_evicted(key, &entry.value);
            return true;
        }
        false
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn clear(&self) {
        let mut entries = self.lock();
        for (key, entry) in entries.drain() {
            if let Some(callback) = &self.evict_callback {
                callback(&key, &entry.value);
            }
        }
    }

    fn close(&self) {
        self.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn stores_without_eviction() {
        let cache = SimpleCache::new(2, None, None);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        // Capacity is advisory for the simple policy.
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&"a"), Some(1));
    }

    #[test]
    fn ttl_still_applies() {
        let cache = SimpleCache::new(4, None, Some(Duration::from_millis(10)));
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn remove_reports_presence() {
        let cache = SimpleCache::new(4, None, None);
        cache.insert("a", 1);
        assert!(cache.remove(&"a"));
        assert!(!cache.remove(&"a"));
    }
}
