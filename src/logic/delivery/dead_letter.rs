//! Bounded dead-letter queue

use std::collections::VecDeque;

use super::types::DeadLetterEntry;

#[derive(Debug)]
pub struct DeadLetterQueue {
    entries: VecDeque<DeadLetterEntry>,
    capacity: usize,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append; when full the oldest entry is discarded and returned
    pub fn push(&mut self, entry: DeadLetterEntry) -> Option<DeadLetterEntry> {
        let discarded = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        discarded
    }

    pub fn pop_oldest(&mut self) -> Option<DeadLetterEntry> {
        self.entries.pop_front()
    }

    /// Return a drained entry to the head after a failed retry
    pub fn push_front(&mut self, entry: DeadLetterEntry) -> Option<DeadLetterEntry> {
        let discarded = if self.entries.len() >= self.capacity {
            self.entries.pop_back()
        } else {
            None
        };
        self.entries.push_front(entry);
        discarded
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeadLetterEntry> {
        self.entries.iter()
    }
}
