//! Bounded output log.

use std::collections::VecDeque;

use crate::types::OutputEvent;

pub const DEFAULT_LOG_CAPACITY: usize = 1_000;

/// Ring buffer of output lines; the oldest line is evicted first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLog {
    events: VecDeque<OutputEvent>,
    capacity: usize,
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl OutputLog {
    /// A capacity of 0 is treated as 1.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, event: OutputEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = OutputEvent>) {
        for event in events {
            self.push(event);
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &OutputEvent> {
        self.events.iter()
    }

    /// The last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &OutputEvent> {
        self.events.iter().skip(self.events.len().saturating_sub(n))
    }
}
