//! Worker-local scheduling handle.

use super::registry::TaskRegistry;
use super::Entry;
use crate::task::{Task, TaskId};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Weak;
use tether_engine::ContextFlag;

/// State shared between the loop and the handles it gives out.
pub(crate) struct LocalState {
    /// Tasks scheduled from the worker, picked up at the loop's next wait
    pub inbox: RefCell<VecDeque<Entry>>,
    pub registry: RefCell<TaskRegistry>,
    pub context: ContextFlag,
}

impl LocalState {
    pub fn new(context: ContextFlag) -> Self {
        Self {
            inbox: RefCell::new(VecDeque::new()),
            registry: RefCell::new(TaskRegistry::new()),
            context,
        }
    }

    /// Cancel `id` if the context is current and the id is live.
    pub fn cancel(&self, id: TaskId) -> bool {
        if !self.context.is_current() {
            return false;
        }
        let canceled = self.registry.borrow_mut().cancel(id);
        if canceled {
            tracing::trace!(%id, "task canceled");
        }
        canceled
    }
}

/// Schedules work from the worker thread, for example from host callbacks
/// running inside a script.
///
/// Holds a weak reference: once the loop is gone every operation is a
/// logged no-op.
#[derive(Clone)]
pub struct Scheduler {
    state: Weak<LocalState>,
}

impl Scheduler {
    pub(crate) fn new(state: Weak<LocalState>) -> Self {
        Self { state }
    }

    /// Schedule `task` with no completion.
    pub fn push(&self, task: Task) -> bool {
        let Some(state) = self.state.upgrade() else {
            tracing::warn!(?task, "event loop is gone, dropping task");
            return false;
        };
        state.inbox.borrow_mut().push_back(Entry::new(task));
        true
    }

    /// Schedule `task` under a fresh identity that can later be passed to
    /// [`cancel`](Self::cancel).
    ///
    /// Returns `None` if the loop is gone or its context is not current.
    pub fn push_cancellable(&self, mut task: Task) -> Option<TaskId> {
        let Some(state) = self.state.upgrade() else {
            tracing::warn!(?task, "event loop is gone, dropping task");
            return None;
        };
        if !state.context.is_current() {
            return None;
        }
        let id = state.registry.borrow_mut().register(task.cancel_flag());
        task.assign_id(id);
        state.inbox.borrow_mut().push_back(Entry::new(task));
        Some(id)
    }

    /// Cancel a task scheduled with [`push_cancellable`](Self::push_cancellable).
    ///
    /// Unknown ids are ignored.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.state.upgrade() {
            Some(state) => state.cancel(id),
            None => false,
        }
    }

    pub fn is_registered(&self, id: TaskId) -> bool {
        self.state
            .upgrade()
            .map_or(false, |state| state.registry.borrow().contains(id))
    }

    pub fn is_alive(&self) -> bool {
        self.state.strong_count() > 0
    }
}
