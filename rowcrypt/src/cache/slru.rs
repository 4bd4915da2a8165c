use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{Cache, EvictCallback};

// Share of capacity reserved for the protected segment.
const PROTECTED_RATIO: f64 = 0.8;

struct SlruEntry<V> {
    value: V,
    last_accessed: Instant,
    protected: bool,
}

struct SlruState<K, V> {
    entries: HashMap<K, SlruEntry<V>>,
    // Fronts are most recently used.
    probation: VecDeque<K>,
    protected: VecDeque<K>,
}

/// Segmented LRU cache.
///
/// New entries land in the probation segment; a second access promotes them
/// to the protected segment (~80% of capacity). Protected overflow demotes
/// back to probation, and eviction drains probation before protected. This
/// keeps one-touch entries from flushing the working set.
pub struct SlruCache<K, V> {
    state: Mutex<SlruState<K, V>>,
    capacity: usize,
    protected_capacity: usize,
    evict_callback: Option<EvictCallback<K, V>>,
    ttl: Option<Duration>,
}

impl<K, V> SlruCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        capacity: usize,
        evict_callback: Option<EvictCallback<K, V>>,
        ttl: Option<Duration>,
    ) -> Self {
        let protected_capacity = ((capacity as f64) * PROTECTED_RATIO) as usize;

        Self {
            state: Mutex::new(SlruState {
                entries: HashMap::with_capacity(capacity),
                probation: VecDeque::new(),
                protected: VecDeque::new(),
            }),
            capacity,
            protected_capacity,
            evict_callback,
            ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlruState<K, V>> {
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

    fn remove_from_queue(queue: &mut VecDeque<K>, key: &K) {
        if let Some(pos) = queue.iter().position(|k| k == key) {
            queue.remove(pos);
        }
    }

    /// Promotes a probation entry, demoting the protected tail on overflow.
    fn promote(&self, state: &mut SlruState<K, V>, key: &K) {
        Self::remove_from_queue(&mut state.probation, key);

        if let Some(entry) = state.entries.get_mut(key) {
            entry.protected = true;
            entry.last_accessed = Instant::now();
        }
        state.protected.push_front(key.clone());

        if state.protected.len() > self.protected_capacity {
            if let Some(demoted) = state.protected.pop_back() {
                if let Some(entry) = state.entries.get_mut(&demoted) {
                    entry.protected = false;
                }
                state.probation.push_front(demoted);
            }
        }
    }

    /// Evicts one entry: probation tail first, protected tail as a
    /// fallback.
    fn evict_one(&self, state: &mut SlruState<K, V>) {
        while let Some(victim) = state.probation.pop_back() {
            if let Some(entry) = state.entries.remove(&victim) {
                self.notify_evicted(&victim, &entry.value);
                return;
            }
        }
        while let Some(victim) = state.protected.pop_back() {
            if let Some(entry) = state.entries.remove(&victim) {
                self.notify_evicted(&victim, &entry.value);
                return;
            }
        }
    }

    fn remove_entry(&self, state: &mut SlruState<K, V>, key: &K) -> bool {
        if let Some(entry) = state.entries.remove(key) {
            if entry.protected {
                Self::remove_from_queue(&mut state.protected, key);
            } else {
                Self::remove_from_queue(&mut state.probation, key);
            }
            self.notify_evicted(key, &entry.value);
            return true;
        }
        false
    }
}

impl<K, V> Cache<K, V> for SlruCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let (value, protected, expired) = match state.entries.get(key) {
            Some(entry) => (
                entry.value.clone(),
                entry.protected,
                self.ttl
                    .map(|ttl| entry.last_accessed.elapsed() > ttl)
                    .unwrap_or(false),
            ),
            None => return None,
        };

        if expired {
            self.remove_entry(state, key);
            return None;
        }

        if protected {
            if let Some(entry) = state.entries.get_mut(key) {
                entry.last_accessed = Instant::now();
            }
            Self::remove_from_queue(&mut state.protected, key);
            state.protected.push_front(key.clone());
        } else {
            self.promote(state, key);
        }

        Some(value)
    }

    fn insert(&self, key: K, value: V) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;

        let existing = state.entries.get_mut(&key).map(|entry| {
            entry.value = value.clone();
            entry.last_accessed = Instant::now();
            entry.protected
        });
        if let Some(protected) = existing {
            if protected {
                Self::remove_from_queue(&mut state.protected, &key);
                state.protected.push_front(key);
            } else {
                self.promote(state, &key);
            }
            return true;
        }

        if state.entries.len() >= self.capacity {
            self.evict_one(state);
        }

        state.entries.insert(
            key.clone(),
            SlruEntry {
                value,
                last_accessed: Instant::now(),
                protected: false,
            },
        );
        state.probation.push_front(key);
        true
    }

    fn remove(&self, key: &K) -> bool {
        let mut state = self.lock();
        self.remove_entry(&mut state, key)
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
        state.probation.clear();
        state.protected.clear();
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
    fn second_access_promotes_to_protected() {
        let cache = SlruCache::new(3, None, None);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        // Promote "a"; the next insert must evict from probation.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("d", 4);

        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn protected_entries_survive_probation_churn() {
        let cache = SlruCache::new(4, None, None);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);
        cache.insert("d", 4);

        cache.get(&"a");
        cache.get(&"b");

        cache.insert("e", 5);
        cache.insert("f", 6);

        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn protected_segment_is_eighty_percent() {
        let cache = SlruCache::<&str, i32>::new(10, None, None);
        assert_eq!(cache.protected_capacity, 8);
    }

    #[test]
    fn eviction_keeps_capacity() {
        let cache = SlruCache::new(2, None, None);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        let survivors = ["a", "b", "c"]
            .iter()
            .filter(|k| cache.get(k).is_some())
            .count();
        assert_eq!(survivors, 2);
    }

    #[test]
    fn remove_works_in_both_segments() {
        let cache = SlruCache::new(4, None, None);
        cache.insert("probation", 1);
        cache.insert("protected", 2);
        cache.get(&"protected");

        assert!(cache.remove(&"probation"));
        assert!(cache.remove(&"protected"));
        assert!(!cache.remove(&"missing"));
        assert!(cache.is_empty());
    }
}
