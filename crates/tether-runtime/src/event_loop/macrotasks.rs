//! Time-ordered macrotask set.

use super::Entry;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Entries ordered by ascending time-to-execution. An entry goes after every
/// entry due no later than itself, so ties keep insertion order.
#[derive(Default)]
pub(crate) struct MacrotaskSet {
    entries: VecDeque<Entry>,
}

impl MacrotaskSet {
    pub fn insert(&mut self, entry: Entry) {
        let now = Instant::now();
        let due = entry.task.time_to_execution_at(now);
        let index = self
            .entries
            .partition_point(|queued| queued.task.time_to_execution_at(now) <= due);
        self.entries.insert(index, entry);
    }

    /// Time until the earliest entry is due, `None` if the set is empty.
    pub fn next_due_in(&self) -> Option<Duration> {
        self.entries.front().map(|entry| entry.task.time_to_execution())
    }

    /// Remove the earliest entry if it is due now.
    pub fn pop_ready(&mut self) -> Option<Entry> {
        if self.entries.front()?.task.is_ready() {
            self.entries.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Entry> + '_ {
        self.entries.drain(..)
    }
}
