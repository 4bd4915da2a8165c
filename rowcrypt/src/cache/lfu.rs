use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{Cache, EvictCallback};

struct LfuEntry<V> {
    value: V,
    frequency: u64,
    last_accessed: Instant,
}

struct LfuState<K, V> {
    entries: HashMap<K, LfuEntry<V>>,
    // frequency -> keys at that frequency; fronts are most recently touched,
    // so eviction pops the bucket tail.
    buckets: BTreeMap<u64, VecDeque<K>>,
}

impl<K: Eq + Hash + Clone, V> LfuState<K, V> {
    fn detach(&mut self, key: &K, frequency: u64) {
        if let Some(bucket) = self.buckets.get_mut(&frequency) {
            if let Some(pos) = bucket.iter().position(|k| k == key) {
                bucket.remove(pos);
            }
            if bucket.is_empty() {
                self.buckets.remove(&frequency);
            }
        }
    }

    /// Moves a key to the `frequency + 1` bucket, creating it if absent.
    fn bump(&mut self, key: &K) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        let old = entry.frequency;
        entry.frequency += 1;
        entry.last_accessed = Instant::now();
        let new = entry.frequency;

        self.detach(key, old);
        self.buckets.entry(new).or_default().push_front(key.clone());
    }
}

/// Least-frequently-used cache.
///
/// Entries are grouped into frequency buckets kept in ascending order; an
/// access moves the entry one bucket up, and eviction takes the tail of the
/// lowest bucket.
pub struct LfuCache<K, V> {
    state: Mutex<LfuState<K, V>>,
    capacity: usize,
    evict_callback: Option<EvictCallback<K, V>>,
    ttl: Option<Duration>,
}

impl<K, V> LfuCache<K, V>
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
            state: Mutex::new(LfuState {
                entries: HashMap::with_capacity(capacity),
                buckets: BTreeMap::new(),
            }),
            capacity,
            evict_callback,
            ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LfuState<K, V>> {
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

    fn evict_lfu(&self, state: &mut LfuState<K, V>) {
        let lowest = match state.buckets.iter_mut().next() {
            Some((frequency, bucket)) => bucket.pop_back().map(|key| (*frequency, key)),
            None => None,
        };

        let Some((frequency, victim)) = lowest else {
            return;
        };

        if state
            .buckets
            .get(&frequency)
            .is_some_and(|bucket| bucket.is_empty())
        {
            state.buckets.remove(&frequency);
        }

        if let Some(entry) = state.entries.remove(&victim) {
            self.notify_evicted(&victim, &entry.value);
        }
    }

    fn remove_entry(&self, state: &mut LfuState<K, V>, key: &K) -> bool {
        if let Some(entry) = state.entries.remove(key) {
            state.detach(key, entry.frequency);
            self.notify_evicted(key, &entry.value);
            return true;
        }
        false
    }
}

impl<K, V> Cache<K, V> for LfuCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let (value, expired) = match state.entries.get(key) {
            Some(entry) => (
                entry.value.clone(),
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

        state.bump(key);
        Some(value)
    }

    fn insert(&self, key: K, value: V) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;

        if let Some(entry) = state.entries.get_mut(&key) {
            entry.value = value;
            entry.last_accessed = Instant::now();
            state.bump(&key);
            return true;
        }

        if state.entries.len() >= self.capacity {
            self.evict_lfu(state);
        }

        state.entries.insert(
            key.clone(),
            LfuEntry {
                value,
                frequency: 1,
                last_accessed: Instant::now(),
            },
        );
        state.buckets.entry(1).or_default().push_front(key);
        true
    }

    fn remove(&self, key: &K) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        self.remove_entry(state, key)
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn clear(&self) {
        let mut guard = self.lock();
        let state = &mut *guard;
        for (key, entry) in state.entries.drain() {
            if let Some(callback) = &self.evict_callback {
                callback(&key, &entry.value);
            }
        }
        state.buckets.clear();
    }

    fn close(&self) {
        self.clear();
    }
}
