//! Linear undo/redo log over whole-value snapshots.

use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History<T> {
    past: Vec<T>,
    present: T,
    future: VecDeque<T>,
    limit: Option<usize>,
}

impl<T> History<T> {
    pub fn new(present: T) -> Self {
        Self::with_limit(present, None)
    }

    /// `limit` caps the number of undo steps kept; the oldest are dropped first.
    pub fn with_limit(present: T, limit: Option<usize>) -> Self {
        Self {
            past: Vec::new(),
            present,
            future: VecDeque::new(),
            limit,
        }
    }

    pub fn present(&self) -> &T {
        &self.present
    }

    /// Oldest first.
    pub fn past(&self) -> &[T] {
        &self.past
    }

    /// Nearest redo first.
    pub fn future(&self) -> impl Iterator<Item = &T> {
        self.future.iter()
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    /// Commits a new present value. Redo history is discarded.
    pub fn set(&mut self, value: T) {
        let previous = std::mem::replace(&mut self.present, value);
        self.past.push(previous);
        self.future.clear();
        self.enforce_limit();
    }

    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.past.pop() else {
            return false;
        };
        let current = std::mem::replace(&mut self.present, previous);
        self.future.push_front(current);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(next) = self.future.pop_front() else {
            return false;
        };
        let current = std::mem::replace(&mut self.present, next);
        self.past.push(current);
        self.enforce_limit();
        true
    }

    /// Drops all history and starts over from `value`.
    pub fn clear(&mut self, value: T) {
        self.past.clear();
        self.future.clear();
        self.present = value;
    }

    fn enforce_limit(&mut self) {
        if let Some(limit) = self.limit {
            if self.past.len() > limit {
                let excess = self.past.len() - limit;
                self.past.drain(..excess);
            }
        }
    }
}
