use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{Cache, EvictCallback};

struct LruEntry<V> {
    value: V,
    last_accessed: Instant,
}

struct LruState<K, V> {
    entries: HashMap<K, LruEntry<V>>,
    // Front is most recently used.
    queue: VecDeque<K>,
}

/// Least-recently-used cache.
pub struct LruCache<K, V> {
    state: Mutex<LruState<K, V>>,
    capacity: usize,
    evict_callback: Option<EvictCallback<K, V>>,
    ttl: Option<Duration>,
}

impl<K, V> LruCache<K, V>
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
            state: Mutex::new(LruState {
                entries: HashMap::with_capacity(capacity),
                queue: VecDeque::with_capacity(capacity),
            }),
            capacity,
            evict_callback,
            ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruState<K, V>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify_evicted(&self, key: &K, value: &V) {
        if let Some(callback) = &self.evict_callback {
            callback(key, value);
        }
    }

    fn touch(state: &mut LruState<K, V>, key: &K) {
        if let Some(pos) = state.queue.iter().position(|k| k == key) {
            state.queue.remove(pos);
        }
        state.queue.push_front(key.clone());
    }

    fn evict_tail(&self, state: &mut LruState<K, V>) {
        while let Some(victim) = state.queue.pop_back() {
            if let Some(entry) = state.entries.remove(&victim) {
                self.notify_evicted(&victim, &entry.value);
                return;
            }
        }
    }
}

impl<K, V> Cache<K, V> for LruCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let mut state = self.lock();

        let expired = match (self.ttl, state.entries.get(key)) {
            (Some(ttl), Some(entry)) => entry.last_accessed.elapsed() > ttl,
            (_, None) => return None,
            _ => false,
        };

        if expired {
            if let Some(entry) = state.entries.remove(key) {
                if let Some(pos) = state.queue.iter().position(|k| k == key) {
                    state.queue.remove(pos);
                }
                self.notify_evicted(key, &entry.value);
            }
            return None;
        }

        let value = {
            let entry = state.entries.get_mut(key)?;
            entry.last_accessed = Instant::now();
            entry.value.clone()
        };
        Self::touch(&mut state, key);
        Some(value)
    }

    fn insert(&self, key: K, value: V) -> bool {
        let mut state = self.lock();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
            self.evict_tail(&mut state);
        }

        state.entries.insert(
            key.clone(),
            LruEntry {
                value,
                last_accessed: Instant::now(),
            },
        );
        Self::touch(&mut state, &key);
        true
    }

    fn remove(&self, key: &K) -> bool {
        let mut state = self.lock();
        if let Some(entry) = state.entries.remove(key) {
            if let Some(pos) = state.queue.iter().position(|k| k == key) {
                state.queue.remove(pos);
            }
            self.notify_evicted(key, &entry.value);
            return true;
        }
        false
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn clear(&self) {
        let mut state = self.lock();
        for (key, entry) in state.entries.drain() {
            if let Some(callback) = &self.evict_callback {
                callback(&key, &entry.value);
            }
        }
        state.queue.clear();
    }

    fn close(&self) {
        self.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn evicts_least_recently_used() {
        let cache = LruCache::new(2, None, None);
        cache.insert("a", 1);
        cache.insert("b", 2);

        // Touch "a" so "b" becomes the LRU victim.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"c"), Some(3));
    }

    fn counting_callback(
        evictions: &Arc<AtomicUsize>,
    ) -> super::super::EvictCallback<&'static str, i32> {
        let counter = Arc::clone(evictions);
        Arc::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn eviction_callback_fires_exactly_once_per_eviction() {
        let evictions = Arc::new(AtomicUsize::new(0));
        let cache = LruCache::new(2, Some(counting_callback(&evictions)), None);

        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        assert_eq!(evictions.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn ttl_expires_idle_entries() {
        let cache = LruCache::new(4, None, Some(Duration::from_millis(10)));
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn reinsert_updates_value() {
        let cache = LruCache::new(2, None, None);
        cache.insert("a", 1);
        cache.insert("a", 10);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_invokes_callback_for_all() {
        let evictions = Arc::new(AtomicUsize::new(0));
        let cache = LruCache::new(4, Some(counting_callback(&evictions)), None);

        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.clear();

        assert_eq!(evictions.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }
}
