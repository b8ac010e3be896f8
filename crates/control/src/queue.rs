use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};

use crate::handle::TaskHandle;
use crate::types::{TaskPriority, TaskStatus};

struct QueuedEntry {
    priority: TaskPriority,
    sequence: u64,
    handle: TaskHandle,
}

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedEntry {}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEntry {
    /// Max-heap order: higher priority first, then lower sequence (FIFO).
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Ready handles ordered by priority, FIFO within a priority class.
///
/// Not synchronized on its own: the scheduler keeps it behind the same lock
/// as the worker pool.
#[derive(Default)]
pub(crate) struct PriorityWaitQueue {
    heap: BinaryHeap<QueuedEntry>,
}

impl PriorityWaitQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, handle: TaskHandle) {
        self.heap.push(QueuedEntry {
            priority: handle.priority(),
            sequence: handle.sequence(),
            handle,
        });
    }

    /// Next handle in dispatch order. Callers must still check it is
    /// waiting: a task may be canceled after it was queued.
    pub(crate) fn pop(&mut self) -> Option<TaskHandle> {
        self.heap.pop().map(|entry| entry.handle)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Drop entries whose task is no longer waiting, returning them.
    pub(crate) fn purge_inactive(&mut self) -> Vec<TaskHandle> {
        if self.heap.iter().all(|e| e.handle.status() == TaskStatus::Waiting) {
            return Vec::new();
        }
        let mut removed = Vec::new();
        let entries = std::mem::take(&mut self.heap).into_vec();
        for entry in entries {
            if entry.handle.status() == TaskStatus::Waiting {
                self.heap.push(entry);
            } else {
                removed.push(entry.handle);
            }
        }
        removed
    }

    /// Remove everything, in dispatch order.
    pub(crate) fn drain(&mut self) -> Vec<TaskHandle> {
        let mut entries = std::mem::take(&mut self.heap).into_sorted_vec();
        entries.reverse();
        entries.into_iter().map(|e| e.handle).collect()
    }

    /// Queued handles in dispatch order.
    pub(crate) fn ordered(&self) -> Vec<TaskHandle> {
        let mut entries: Vec<&QueuedEntry> = self.heap.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|e| e.handle.clone()).collect()
    }

    /// Number of waiting tasks per priority level.
    pub(crate) fn pending_by_priority(&self) -> HashMap<TaskPriority, usize> {
        let mut pending = HashMap::new();
        for entry in self.heap.iter() {
            if entry.handle.status() == TaskStatus::Waiting {
                *pending.entry(entry.priority).or_default() += 1;
            }
        }
        pending
    }
}
