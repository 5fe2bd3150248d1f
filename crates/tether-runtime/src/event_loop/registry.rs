//! Identity table for cancellable tasks.

use crate::task::{CancelFlag, TaskId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

/// Maps live cancellable tasks to their cancellation flags.
///
/// Only touched from the worker thread.
pub(crate) struct TaskRegistry {
    entries: FxHashMap<TaskId, CancelFlag>,
    rng: StdRng,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Register `flag` under a fresh identity.
    pub fn register(&mut self, flag: CancelFlag) -> TaskId {
        let id = self.fresh_id();
        self.entries.insert(id, flag);
        id
    }

    /// Draw random ids until one is unused.
    fn fresh_id(&mut self) -> TaskId {
        loop {
            let candidate = TaskId(self.rng.gen_range(1..=TaskId::MAX));
            if !self.entries.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Flip the flag of `id` and forget it. Returns `false` for unknown ids.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        match self.entries.remove(&id) {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: TaskId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
