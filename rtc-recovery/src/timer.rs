//! One-shot timer scheduling over a driven clock.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

/// Scheduled one-shot timers with cancel-and-restart semantics, shared by all
/// entries of an owning instance.
///
/// A binary heap orders pending deadlines while a live map tracks the current
/// generation per key; rescheduling or cancelling simply bumps the map, and
/// superseded heap entries are discarded lazily when they surface. Keys due
/// at the same deadline pop in scheduling order.
///
/// The queue never fires by itself: the owner exposes
/// [`next_deadline`](TimerQueue::next_deadline) for its `poll_timeout()` and
/// drains [`pop_due`](TimerQueue::pop_due) from its `handle_timeout(now_ms)`.
pub(crate) struct TimerQueue<K> {
    heap: BinaryHeap<Entry<K>>,
    live: HashMap<K, u64>,
    next_generation: u64,
}

struct Entry<K> {
    deadline_ms: u64,
    generation: u64,
    key: K,
}

// Min-heap on (deadline, generation); the key itself is never compared.
impl<K> Ord for Entry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.deadline_ms, other.generation).cmp(&(self.deadline_ms, self.generation))
    }
}

impl<K> PartialOrd for Entry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> PartialEq for Entry<K> {
    fn eq(&self, other: &Self) -> bool {
        (self.deadline_ms, self.generation) == (other.deadline_ms, other.generation)
    }
}

impl<K> Eq for Entry<K> {}

impl<K: Copy + Eq + Hash> TimerQueue<K> {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Schedule `key` to fire at `deadline_ms`, replacing any pending
    /// schedule for the same key.
    pub(crate) fn schedule(&mut self, key: K, deadline_ms: u64) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.live.insert(key, generation);
        self.heap.push(Entry {
            deadline_ms,
            generation,
            key,
        });
    }

    pub(crate) fn cancel(&mut self, key: &K) {
        self.live.remove(key);
    }

    /// Earliest pending deadline, if any.
    pub(crate) fn next_deadline(&mut self) -> Option<u64> {
        self.drop_stale();
        self.heap.peek().map(|entry| entry.deadline_ms)
    }

    /// Pop the next key due at or before `now_ms`.
    pub(crate) fn pop_due(&mut self, now_ms: u64) -> Option<K> {
        self.drop_stale();
        if self.heap.peek()?.deadline_ms > now_ms {
            return None;
        }
        let entry = self.heap.pop()?;
        self.live.remove(&entry.key);
        Some(entry.key)
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }

    fn drop_stale(&mut self) {
        while let Some(entry) = self.heap.peek() {
            if self.live.get(&entry.key) == Some(&entry.generation) {
                return;
            }
            self.heap.pop();
        }
    }
}
