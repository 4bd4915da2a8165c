use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{Cache, EvictCallback};

// Window share of total capacity; the rest is the SLRU main.
const WINDOW_DENOMINATOR: usize = 100;
// Protected share of the main segment.
const PROTECTED_RATIO: f64 = 0.8;
// Sketch additions before a periodic reset, per unit of capacity.
const SAMPLE_FACTOR: usize = 10;
// 4-bit counters saturate here.
const COUNTER_MAX: u8 = 15;

/// Approximate frequency sketch: a 4-bit count-min sketch fronted by a 1-bit
/// "doorkeeper" bloom filter that absorbs first touches. Counters are halved
/// and the doorkeeper cleared after `sample_size` additions so stale history
/// decays.
struct FrequencySketch {
    counters: Vec<u8>,
    doorkeeper: Vec<u64>,
    mask: u64,
    additions: usize,
    sample_size: usize,
}

impl FrequencySketch {
    fn with_capacity(capacity: usize) -> Self {
        let slots = capacity.max(64).next_power_of_two();
        Self {
            // Two 4-bit counters per byte.
            counters: vec![0; slots / 2],
            doorkeeper: vec![0; slots / 64],
            mask: (slots - 1) as u64,
            additions: 0,
            sample_size: capacity.saturating_mul(SAMPLE_FACTOR).max(64),
        }
    }

    fn index(&self, hash: u64, seed: u64) -> usize {
        (hash.wrapping_mul(seed).rotate_left(32) & self.mask) as usize
    }

    const SEEDS: [u64; 4] = [
        0x9E37_79B9_7F4A_7C15,
        0xC2B2_AE3D_27D4_EB4F,
        0x1656_67B1_9E37_79F9,
        0xFF51_AFD7_ED55_8CCD,
    ];

    fn counter(&self, slot: usize) -> u8 {
        let byte = self.counters[slot / 2];
        if slot % 2 == 0 {
            byte & 0x0F
        } else {
            byte >> 4
        }
    }

    fn set_counter(&mut self, slot: usize, value: u8) {
        let byte = &mut self.counters[slot / 2];
        if slot % 2 == 0 {
            *byte = (*byte & 0xF0) | (value & 0x0F);
        } else {
            *byte = (*byte & 0x0F) | (value << 4);
        }
    }

    fn doorkeeper_slot(&self, hash: u64) -> (usize, u64) {
        let bit = hash.wrapping_mul(0x2545_F491_4F6C_DD1D) & self.mask;
        ((bit / 64) as usize, 1_u64 << (bit % 64))
    }

    fn doorkeeper_contains(&self, hash: u64) -> bool {
        let (word, bit) = self.doorkeeper_slot(hash);
        self.doorkeeper[word] & bit != 0
    }

    fn record(&mut self, hash: u64) {
        let (word, bit) = self.doorkeeper_slot(hash);
        if self.doorkeeper[word] & bit == 0 {
            // First touch goes to the doorkeeper only, keeping one-hit
            // wonders out of the counters.
            self.doorkeeper[word] |= bit;
        } else {
            for seed in Self::SEEDS {
                let slot = self.index(hash, seed);
                let current = self.counter(slot);
                if current < COUNTER_MAX {
                    self.set_counter(slot, current + 1);
                }
            }
        }

        self.additions += 1;
        if self.additions >= self.sample_size {
            self.reset();
        }
    }

    fn estimate(&self, hash: u64) -> u16 {
        let mut minimum = u8::MAX;
        for seed in Self::SEEDS {
            minimum = minimum.min(self.counter(self.index(hash, seed)));
        }
        u16::from(minimum) + u16::from(self.doorkeeper_contains(hash))
    }

    fn reset(&mut self) {
        for byte in &mut self.counters {
            // Halve both nibbles in place.
            *byte = (*byte >> 1) & 0x77;
        }
        for word in &mut self.doorkeeper {
            *word = 0;
        }
        self.additions /= 2;
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Segment {
    Window,
    Probation,
    Protected,
}

struct TlfuEntry<V> {
    value: V,
    segment: Segment,
    last_accessed: Instant,
}

struct TlfuState<K, V> {
    entries: HashMap<K, TlfuEntry<V>>,
    // Fronts are most recently used.
    window: VecDeque<K>,
    probation: VecDeque<K>,
    protected: VecDeque<K>,
    sketch: FrequencySketch,
}

/// TinyLFU cache: a small LRU admission window in front of a segmented-LRU
/// main area.
///
/// New entries enter the window; when the window overflows, its oldest entry
/// competes against the main area's eviction victim and only the one with
/// the higher sketch frequency survives. This admits recurring keys while
/// shedding scan traffic.
pub struct TlfuCache<K, V> {
    state: Mutex<TlfuState<K, V>>,
    capacity: usize,
    window_capacity: usize,
    main_capacity: usize,
    protected_capacity: usize,
    evict_callback: Option<EvictCallback<K, V>>,
    ttl: Option<Duration>,
}

impl<K, V> TlfuCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        capacity: usize,
        evict_callback: Option<EvictCallback<K, V>>,
        ttl: Option<Duration>,
    ) -> Self {
        let window_capacity = (capacity / WINDOW_DENOMINATOR).max(1);
        let main_capacity = capacity.saturating_sub(window_capacity);
        let protected_capacity = ((main_capacity as f64) * PROTECTED_RATIO) as usize;

        Self {
            state: Mutex::new(TlfuState {
                entries: HashMap::with_capacity(capacity),
                window: VecDeque::new(),
                probation: VecDeque::new(),
                protected: VecDeque::new(),
                sketch: FrequencySketch::with_capacity(capacity),
            }),
            capacity,
            window_capacity,
            main_capacity,
            protected_capacity,
            evict_callback,
            ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TlfuState<K, V>> {
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

    fn hash_of(key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn remove_from_queue(queue: &mut VecDeque<K>, key: &K) {
        if let Some(pos) = queue.iter().position(|k| k == key) {
            queue.remove(pos);
        }
    }

    fn queue_for(state: &mut TlfuState<K, V>, segment: Segment) -> &mut VecDeque<K> {
        match segment {
            Segment::Window => &mut state.window,
            Segment::Probation => &mut state.probation,
            Segment::Protected => &mut state.protected,
        }
    }

    /// Refreshes recency for an existing entry, promoting probation hits
    /// into the protected segment.
    fn touch(&self, state: &mut TlfuState<K, V>, key: &K, segment: Segment) {
        match segment {
            Segment::Window => {
                Self::remove_from_queue(&mut state.window, key);
                state.window.push_front(key.clone());
            }
            Segment::Protected => {
                Self::remove_from_queue(&mut state.protected, key);
                state.protected.push_front(key.clone());
            }
            Segment::Probation => {
                Self::remove_from_queue(&mut state.probation, key);
                if let Some(entry) = state.entries.get_mut(key) {
                    entry.segment = Segment::Protected;
                }
                state.protected.push_front(key.clone());

                if state.protected.len() > self.protected_capacity {
                    if let Some(demoted) = state.protected.pop_back() {
                        if let Some(entry) = state.entries.get_mut(&demoted) {
                            entry.segment = Segment::Probation;
                        }
                        state.probation.push_front(demoted);
                    }
                }
            }
        }
    }

    /// Handles window overflow: the window's oldest entry either moves into
    /// the main area or competes with the main victim on sketch frequency.
    fn maintain_window(&self, state: &mut TlfuState<K, V>) {
        while state.window.len() > self.window_capacity {
            let Some(candidate) = state.window.pop_back() else {
                return;
            };

            if state.probation.len() + state.protected.len() < self.main_capacity {
                if let Some(entry) = state.entries.get_mut(&candidate) {
                    entry.segment = Segment::Probation;
                }
                state.probation.push_front(candidate);
                continue;
            }

            // Main is full: duel against the main victim.
            let victim = state
                .probation
                .back()
                .or_else(|| state.protected.back())
                .cloned();

            let admit = match &victim {
                Some(victim) => {
                    state.sketch.estimate(Self::hash_of(&candidate))
                        > state.sketch.estimate(Self::hash_of(victim))
                }
                None => false,
            };

            if admit {
                if let Some(victim) = victim {
                    if state.probation.back() == Some(&victim) {
                        state.probation.pop_back();
                    } else {
                        Self::remove_from_queue(&mut state.protected, &victim);
                    }
                    if let Some(entry) = state.entries.remove(&victim) {
                        self.notify_evicted(&victim, &entry.value);
                    }
                }
                if let Some(entry) = state.entries.get_mut(&candidate) {
                    entry.segment = Segment::Probation;
                }
                state.probation.push_front(candidate);
            } else if let Some(entry) = state.entries.remove(&candidate) {
                self.notify_evicted(&candidate, &entry.value);
            }
        }
    }

    fn remove_entry(&self, state: &mut TlfuState<K, V>, key: &K) -> bool {
        if let Some(entry) = state.entries.remove(key) {
            Self::remove_from_queue(Self::queue_for(state, entry.segment), key);
            self.notify_evicted(key, &entry.value);
            return true;
        }
        false
    }
}

impl<K, V> Cache<K, V> for TlfuCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let (value, segment, expired) = match state.entries.get(key) {
            Some(entry) => (
                entry.value.clone(),
                entry.segment,
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

        state.sketch.record(Self::hash_of(key));
        if let Some(entry) = state.entries.get_mut(key) {
            entry.last_accessed = Instant::now();
        }
        self.touch(state, key, segment);

        Some(value)
    }

    fn insert(&self, key: K, value: V) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;

        state.sketch.record(Self::hash_of(&key));

        let existing = state.entries.get_mut(&key).map(|entry| {
            entry.value = value.clone();
            entry.last_accessed = Instant::now();
            entry.segment
        });
        if let Some(segment) = existing {
            self.touch(state, &key, segment);
            return true;
        }

        state.entries.insert(
            key.clone(),
            TlfuEntry {
                value,
                segment: Segment::Window,
                last_accessed: Instant::now(),
            },
        );
        state.window.push_front(key);
        self.maintain_window(state);
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
        state.window.clear();
        state.probation.clear();
        state.protected.clear();
        state.sketch = FrequencySketch::with_capacity(self.capacity);
    }

    fn close(&self) {
        self.clear();
    }
}
