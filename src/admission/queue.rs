//! Priority queue of submissions waiting for admission.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use uuid::Uuid;

/// A waiting submission. The ticket is its submission sequence number.
#[derive(Debug, Clone)]
pub struct QueuedEntry {
    pub ticket: u64,
    pub task_id: Uuid,
    pub priority: i32,
    pub memory_mb: u64,
}

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.ticket == other.ticket
    }
}

impl Eq for QueuedEntry {}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEntry {
    // Max-heap: higher priority first, then the earlier ticket.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.ticket.cmp(&self.ticket))
    }
}

/// Max-heap keyed by (priority desc, ticket asc).
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    heap: BinaryHeap<QueuedEntry>,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: QueuedEntry) {
        self.heap.push(entry);
    }

    pub fn peek(&self) -> Option<&QueuedEntry> {
        self.heap.peek()
    }

    pub fn pop(&mut self) -> Option<QueuedEntry> {
        self.heap.pop()
    }

    /// Remove the entry holding `ticket`. Returns whether it was queued.
    pub fn remove(&mut self, ticket: u64) -> bool {
        let before = self.heap.len();
        self.heap.retain(|entry| entry.ticket != ticket);
        self.heap.len() != before
    }

    /// Remove every entry, in admission order.
    pub fn drain(&mut self) -> Vec<QueuedEntry> {
        let mut entries = std::mem::take(&mut self.heap).into_sorted_vec();
        entries.reverse();
        entries
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
