//! Thread-safe priority work queue: a min-heap on item priority behind a
//! mutex, with async waiters parked on a `Notify`. Closing the queue is
//! monotonic and wakes everyone; remaining items still drain after close.

use crate::models::WorkItem;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Heap entry: ordered by priority, then insertion sequence, so equal
/// priorities pop in FIFO order.
#[derive(Debug)]
struct Entry {
    priority: i64,
    seq: u64,
    item: WorkItem,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Counters exposed for tests and progress reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total_pushed: u64,
    pub total_popped: u64,
    pub current_size: usize,
    pub min_depth: Option<u32>,
    pub max_depth: Option<u32>,
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Reverse<Entry>>,
    closed: bool,
    next_seq: u64,
    total_pushed: u64,
    total_popped: u64,
    min_depth: Option<u32>,
    max_depth: Option<u32>,
}

impl Inner {
    fn push_item(&mut self, item: WorkItem) {
        self.min_depth = Some(self.min_depth.map_or(item.depth, |d| d.min(item.depth)));
        self.max_depth = Some(self.max_depth.map_or(item.depth, |d| d.max(item.depth)));
        self.heap.push(Reverse(Entry {
            priority: item.priority,
            seq: self.next_seq,
            item,
        }));
        self.next_seq += 1;
        self.total_pushed += 1;
    }

    fn pop_item(&mut self) -> Option<WorkItem> {
        let Reverse(entry) = self.heap.pop()?;
        self.total_popped += 1;
        Some(entry.item)
    }
}

pub struct PriorityQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, item: WorkItem) {
        self.inner.lock().push_item(item);
        self.notify.notify_one();
    }

    pub fn push_batch(&self, items: Vec<WorkItem>) {
        {
            let mut inner = self.inner.lock();
            for item in items {
                inner.push_item(item);
            }
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Block until an item is available or the queue is closed and empty.
    pub async fn pop(&self) -> Option<WorkItem> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(item) = inner.pop_item() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Like [`pop`](Self::pop) with a deadline; `None` on timeout as well
    /// as on closed-and-empty.
    pub async fn try_pop(&self, timeout: Duration) -> Option<WorkItem> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(item) = inner.pop_item() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Never blocks.
    pub fn try_pop_nonblocking(&self) -> Option<WorkItem> {
        self.inner.lock().pop_item()
    }

    /// Idempotent. Wakes all waiters; subsequent pops drain remaining items
    /// then return `None`.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn clear(&self) {
        self.inner.lock().heap.clear();
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            total_pushed: inner.total_pushed,
            total_popped: inner.total_popped,
            current_size: inner.heap.len(),
            min_depth: inner.min_depth,
            max_depth: inner.max_depth,
        }
    }
}
