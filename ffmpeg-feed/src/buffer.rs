//! Per-lane reorder buffer.
//!
//! Producers on several threads push items tagged with a sequence number; the
//! lane's pacer pops them lowest-first. The buffer never blocks and never
//! drops: [`OrderedBuffer::size`] is the only backpressure signal a producer
//! gets, and keeping it bounded is the producer's job.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

struct Entry<T> {
    seq: u64,
    // insertion order, keeps equal sequence numbers FIFO
    order: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq && self.order == other.order
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // BinaryHeap is a max-heap; reverse so the lowest sequence number is on top.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .seq
            .cmp(&self.seq)
            .then_with(|| other.order.cmp(&self.order))
    }
}

struct Inner<T> {
    heap: BinaryHeap<Entry<T>>,
    inserted: u64,
    last_sent: Option<T>,
}

pub struct OrderedBuffer<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Clone> OrderedBuffer<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                inserted: 0,
                last_sent: None,
            }),
        }
    }

    /// Buffer whose repeat value starts out as `item`.
    pub fn with_last_sent(item: T) -> Self {
        let buffer = Self::new();
        buffer.inner.lock().last_sent = Some(item);
        buffer
    }

    pub fn push(&self, seq: u64, item: T) {
        let mut inner = self.inner.lock();
        let order = inner.inserted;
        inner.inserted += 1;
        inner.heap.push(Entry { seq, order, item });
    }

    /// Removes and returns the lowest-numbered item, remembering it as the
    /// last sent value. Returns `default` untouched when the buffer is empty.
    pub fn pop_or_default(&self, default: T) -> T {
        let mut inner = self.inner.lock();
        match inner.heap.pop() {
            Some(entry) => {
                inner.last_sent = Some(entry.item.clone());
                entry.item
            }
            None => default,
        }
    }

    /// Like [`pop_or_default`](Self::pop_or_default) with the last sent value
    /// as the default. `None` only before anything was sent or seeded.
    pub fn pop_or_repeat(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        match inner.heap.pop() {
            Some(entry) => {
                inner.last_sent = Some(entry.item.clone());
                Some(entry.item)
            }
            None => inner.last_sent.clone(),
        }
    }

    pub fn last_sent(&self) -> Option<T> {
        self.inner.lock().last_sent.clone()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

impl<T: Clone> Default for OrderedBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared producer-side counter handing out sequence numbers.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_seq(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}
