//! Occurrence counters for titles, creators and item copies.

use serde::{Deserialize, Serialize};

/// Occurrence counter remembering the value before its last change.
///
/// `previous_count == 0` after an `add` means the key is new to its owner and
/// must be written to the title index; any other value means it is already
/// there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Current number of contributing raw records (or copies)
    pub count: u32,
    /// Value of `count` before the last change
    pub previous_count: u32,
}

impl Counter {
    /// Counter starting at `count` with no history.
    #[must_use]
    pub fn with_count(count: u32) -> Self {
        Counter {
            count,
            previous_count: 0,
        }
    }

    /// Add `n` occurrences.
    pub fn add(&mut self, n: u32) {
        self.previous_count = self.count;
        self.count = self.count.saturating_add(n);
    }

    /// Remove `n` occurrences, never going below zero.
    pub fn subtract(&mut self, n: u32) {
        self.previous_count = self.count;
        self.count = self.count.saturating_sub(n);
    }

    /// First occurrence across the owner's history.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.previous_count == 0 && self.count > 0
    }

    /// No occurrences left.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.count == 0
    }
}
