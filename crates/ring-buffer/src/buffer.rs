//! Ring Buffer Implementation

use serde::Serialize;
use std::collections::VecDeque;

/// Bounded history, oldest entry evicted on overflow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RingBuffer<T> {
    /// Entries, oldest first
    items: VecDeque<T>,
    /// Maximum number of entries retained
    capacity: usize,
    /// Total entries ever pushed (for statistics)
    total_written: usize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with given capacity
    ///
    /// A zero capacity is raised to one so the latest entry is always kept.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            total_written: 0,
        }
    }

    /// Push an entry (evicts the oldest if full)
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
        self.total_written += 1;
    }

    /// Most recent entry
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Get the number of entries currently in the buffer
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// Get total entries written (for statistics)
    pub fn total_written(&self) -> usize {
        self.total_written
    }
}
