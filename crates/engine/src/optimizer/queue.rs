//! Optimization priority queue.
//!
//! Entries are keyed by index code. A binary heap orders candidates; a side
//! map holds the live entry per code so re-prioritizing is O(log n): the
//! stale heap entry is left in place and skipped when popped.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

/// Priority used by periodic discovery
pub const DISCOVERY_PRIORITY: i32 = 100;

/// Priority and score of a queued tenant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Lower is more urgent
    pub priority: i32,
    /// Higher is more urgent among equal priorities
    pub score: f64,
}

#[derive(Debug)]
struct HeapItem {
    code: String,
    entry: QueueEntry,
    sequence: u64,
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: lower priority number, then higher score, then older entry.
        other
            .entry
            .priority
            .cmp(&self.entry.priority)
            .then(self.entry.score.total_cmp(&other.entry.score))
            .then(other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for HeapItem {}

#[derive(Default)]
struct State {
    heap: BinaryHeap<HeapItem>,
    live: HashMap<String, (QueueEntry, u64)>,
    sequence: u64,
}

/// Tenants waiting for optimization.
#[derive(Default)]
pub struct OptimizationQueue {
    state: Mutex<State>,
}

impl OptimizationQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `code`.
    ///
    /// If the code is already queued, the call only takes effect when
    /// `priority` is strictly more urgent (numerically lower) than the
    /// queued one. Returns whether the queue changed.
    pub fn enqueue(&self, code: &str, priority: i32, score: f64) -> bool {
        let mut state = self.state.lock();
        if let Some((existing, _)) = state.live.get(code) {
            if existing.priority <= priority {
                return false;
            }
        }

        state.sequence += 1;
        let sequence = state.sequence;
        let entry = QueueEntry { priority, score };
        state.live.insert(code.to_string(), (entry, sequence));
        state.heap.push(HeapItem {
            code: code.to_string(),
            entry,
            sequence,
        });
        true
    }

    /// Take the most urgent tenant.
    pub fn pop(&self) -> Option<(String, QueueEntry)> {
        let mut state = self.state.lock();
        while let Some(item) = state.heap.pop() {
            let current = state.live.get(&item.code).map(|(_, seq)| *seq);
            if current == Some(item.sequence) {
                state.live.remove(&item.code);
                return Some((item.code, item.entry));
            }
        }
        None
    }

    /// Drop `code` from the queue. Returns whether it was queued.
    pub fn remove(&self, code: &str) -> bool {
        self.state.lock().live.remove(code).is_some()
    }

    /// Current entries by code
    pub fn snapshot(&self) -> BTreeMap<String, QueueEntry> {
        self.state
            .lock()
            .live
            .iter()
            .map(|(code, (entry, _))| (code.clone(), *entry))
            .collect()
    }

    /// Number of queued tenants
    pub fn len(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
