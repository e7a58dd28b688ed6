//! Deferred actions keyed on simulation time.
//!
//! Nothing here blocks. Actions are plain values handed back by [`Scheduler::poll`]
//! once their fire time has passed, and the caller runs them to completion.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct Entry<T> {
    fire_time: f64,
    seq: u64,
    action: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // Reversed so the max-heap pops the earliest fire time, then the oldest entry.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_time
            .total_cmp(&self.fire_time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct Scheduler<T> {
    queue: BinaryHeap<Entry<T>>,
    pending: HashSet<u64>,
    next_seq: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            queue: BinaryHeap::new(),
            pending: HashSet::new(),
            next_seq: 0,
        }
    }
}

impl<T> Scheduler<T> {
    /// Run `action` once `delay` seconds have passed since `now`.
    pub fn schedule(&mut self, now: f64, delay: f64, action: T) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Entry {
            fire_time: now + delay.max(0.0),
            seq,
            action,
        });
        self.pending.insert(seq);
        TimerHandle(seq)
    }

    /// Returns true if the timer was still pending.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.pending.remove(&handle.0)
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pending.contains(&handle.0)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.pending.clear();
    }

    /// Pops every action due at `now`, earliest first.
    pub fn poll(&mut self, now: f64) -> Vec<T> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.peek() {
            if entry.fire_time > now {
                break;
            }
            let entry = match self.queue.pop() {
                Some(entry) => entry,
                None => break,
            };
            // Cancelled entries are dropped lazily here.
            if self.pending.remove(&entry.seq) {
                due.push(entry.action);
            }
        }
        due
    }
}
