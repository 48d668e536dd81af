use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::{ComponentId, PinIndex, Tick};

/// A write to deliver through `Component::receive` when the entry fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    pub pin: PinIndex,
    pub value: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub fire_tick: Tick,
    pub seq: u64,
    pub component: ComponentId,
    pub payload: Option<Payload>,
}

// BinaryHeap is a max-heap; invert so the earliest (fire_tick, seq) pops first.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.fire_tick, other.seq).cmp(&(self.fire_tick, self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending component activations, ordered by fire tick then insertion order.
#[derive(Debug, Clone, Default)]
pub struct DelayQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
    committed: Vec<(ComponentId, Payload)>,
}

impl DelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, component: ComponentId, fire_tick: Tick, payload: Option<Payload>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry {
            fire_tick,
            seq,
            component,
            payload,
        });
    }

    /// Remove and return every entry due at or before `now`, in firing order.
    pub fn pop_ready(&mut self, now: Tick) -> Vec<QueueEntry> {
        let mut ready = Vec::new();
        while self.heap.peek().is_some_and(|entry| entry.fire_tick <= now) {
            if let Some(entry) = self.heap.pop() {
                ready.push(entry);
            }
        }
        ready
    }

    /// Hold a write until the current tick has settled. A second write to the
    /// same pin of the same component replaces the first.
    pub fn commit(&mut self, component: ComponentId, payload: Payload) {
        match self
            .committed
            .iter_mut()
            .find(|(id, pending)| *id == component && pending.pin == payload.pin)
        {
            Some(slot) => slot.1 = payload,
            None => self.committed.push((component, payload)),
        }
    }

    pub(crate) fn take_committed(&mut self) -> Vec<(ComponentId, Payload)> {
        std::mem::take(&mut self.committed)
    }

    pub fn peek_next(&self) -> Option<Tick> {
        self.heap.peek().map(|entry| entry.fire_tick)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// All pending entries in firing order.
    pub fn entries(&self) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> = self.heap.iter().copied().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub(crate) fn restore(&mut self, entries: Vec<QueueEntry>, next_seq: u64) {
        self.heap = entries.into_iter().collect();
        self.next_seq = next_seq;
    }
}
