//! Bounded most-recent-first history of accepted recognitions.

use crate::types::RecognitionOutcome;
use std::collections::VecDeque;

pub const DEFAULT_RESULT_CAPACITY: usize = 5;

#[derive(Debug, Clone)]
pub struct ResultBuffer {
    entries: VecDeque<RecognitionOutcome>,
    capacity: usize,
}

impl ResultBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend an outcome, dropping the oldest entries past capacity.
    pub fn push(&mut self, outcome: RecognitionOutcome) {
        self.entries.push_front(outcome);
        self.entries.truncate(self.capacity);
    }

    /// Entries, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &RecognitionOutcome> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn to_vec(&self) -> Vec<RecognitionOutcome> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for ResultBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RESULT_CAPACITY)
    }
}
