//! Event loop
//!
//! The loop runs on the worker thread and reproduces the JavaScript ordering
//! model. Each iteration:
//!
//! 1. drains the microtask queue (promise continuations) in FIFO order;
//! 2. runs every macrotask (timers, scripts, calls) that is due, in order of
//!    remaining time, stopping early if a macrotask queued microtasks;
//! 3. suspends on the cross-thread queue until new work arrives or the next
//!    macrotask is due.
//!
//! Host threads talk to the loop through a [`LoopHandle`]; code running on the
//! worker (host callbacks) uses a [`Scheduler`].
//!
//! Usage and script faults from a task are reported and the loop goes on.
//! Engine and fatal faults, or a panic inside the loop, terminate it.

mod completion;
mod macrotasks;
mod registry;
mod scheduler;

pub use completion::{TaskFuture, TaskResult};
pub use scheduler::Scheduler;

pub(crate) use completion::Completion;

use crate::pump::panic_message;
use crate::queue::WorkQueue;
use crate::task::{Job, Task, TaskId};
use macrotasks::MacrotaskSet;
use scheduler::LocalState;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_engine::{Engine, Fault, UsageFault};

// ============================================================================
// Status
// ============================================================================

/// Lifecycle of an event loop. `Terminated` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Idle,
    Running,
    Terminated,
}

impl LoopStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LoopStatus::Idle,
            1 => LoopStatus::Running,
            _ => LoopStatus::Terminated,
        }
    }
}

// ============================================================================
// Entries and messages
// ============================================================================

/// A task together with whoever waits for it.
pub(crate) struct Entry {
    pub task: Task,
    pub completion: Completion,
}

impl Entry {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            completion: Completion::none(),
        }
    }

    /// Release the task and fail its completion.
    fn discard(mut self, fault: Fault) {
        self.task.release();
        self.completion.complete(Err(fault));
    }
}

/// Message from a host thread to the worker.
enum Envelope {
    Run(Job, Completion),
    Cancel(TaskId),
}

struct LoopShared {
    queue: WorkQueue<Envelope>,
    status: AtomicU8,
}

impl LoopShared {
    fn status(&self) -> LoopStatus {
        LoopStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Idle -> Running. Fails in any other state.
    fn begin(&self) -> bool {
        self.status
            .compare_exchange(
                LoopStatus::Idle as u8,
                LoopStatus::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn terminate(&self) {
        self.status
            .store(LoopStatus::Terminated as u8, Ordering::Release);
        self.queue.stop();
    }
}

// ============================================================================
// LoopHandle
// ============================================================================

/// Thread-safe handle for submitting work to an event loop.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl LoopHandle {
    /// A handle for a loop that has not been created yet; see
    /// [`EventLoop::with_handle`].
    pub fn new() -> Self {
        Self {
            shared: Arc::new(LoopShared {
                queue: WorkQueue::new(),
                status: AtomicU8::new(LoopStatus::Idle as u8),
            }),
        }
    }

    /// Submit `job`. The future resolves when the task has run, or with
    /// [`UsageFault::LoopTerminated`] if it never will.
    pub fn push(&self, job: Job) -> TaskFuture {
        if self.status() == LoopStatus::Terminated {
            return TaskFuture::failed(UsageFault::LoopTerminated);
        }
        let (completion, future) = Completion::channel();
        if !self.shared.queue.enqueue(Envelope::Run(job, completion)) {
            tracing::debug!("push after stop");
        }
        // If the enqueue was refused the completion is already dropped and
        // the future reports termination.
        future
    }

    /// Submit several jobs so the worker receives them together.
    pub fn push_batch<I>(&self, jobs: I) -> Vec<TaskFuture>
    where
        I: IntoIterator<Item = Job>,
    {
        let (envelopes, futures): (Vec<_>, Vec<_>) = jobs
            .into_iter()
            .map(|job| {
                let (completion, future) = Completion::channel();
                (Envelope::Run(job, completion), future)
            })
            .unzip();
        if !self.shared.queue.enqueue_many(envelopes) {
            tracing::debug!("batch push after stop");
        }
        futures
    }

    /// Ask the worker to cancel a task scheduled with an identity.
    ///
    /// Returns whether the request was delivered; an unknown id is ignored
    /// by the worker.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.status() != LoopStatus::Terminated && self.shared.queue.enqueue(Envelope::Cancel(id))
    }

    /// Terminate the loop and wake it if it is waiting. Idempotent.
    pub fn stop(&self) {
        if self.status() != LoopStatus::Terminated {
            tracing::debug!("stopping event loop");
        }
        self.shared.terminate();
    }

    pub fn status(&self) -> LoopStatus {
        self.shared.status()
    }
}

impl Default for LoopHandle {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// EventLoop
// ============================================================================

/// The scheduler. Lives on the worker thread and borrows its engine.
pub struct EventLoop<'e> {
    engine: &'e Engine,
    shared: Arc<LoopShared>,
    local: Rc<LocalState>,
    microtasks: VecDeque<Entry>,
    macrotasks: MacrotaskSet,
    /// A pending-job microtask is already queued
    job_queued: bool,
    on_task_failed: Option<Box<dyn FnMut(&Fault)>>,
    on_terminated: Option<Box<dyn FnOnce(&Fault)>>,
}

impl<'e> EventLoop<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Self::with_handle(engine, LoopHandle::new())
    }

    /// Create the loop behind an existing handle.
    pub fn with_handle(engine: &'e Engine, handle: LoopHandle) -> Self {
        Self {
            engine,
            shared: handle.shared,
            local: Rc::new(LocalState::new(engine.context_flag())),
            microtasks: VecDeque::new(),
            macrotasks: MacrotaskSet::default(),
            job_queued: false,
            on_task_failed: None,
            on_terminated: None,
        }
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(Rc::downgrade(&self.local))
    }

    pub fn status(&self) -> LoopStatus {
        self.shared.status()
    }

    /// Called for every usage or script fault raised by a task.
    pub fn on_task_failed(&mut self, hook: impl FnMut(&Fault) + 'static) {
        self.on_task_failed = Some(Box::new(hook));
    }

    /// Called once if the loop terminates because of a fault.
    pub fn on_terminated(&mut self, hook: impl FnOnce(&Fault) + 'static) {
        self.on_terminated = Some(Box::new(hook));
    }

    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.len()
    }

    pub fn pending_macrotasks(&self) -> usize {
        self.macrotasks.len()
    }

    pub fn registered_tasks(&self) -> usize {
        self.local.registry.borrow().len()
    }

    /// Run until stopped.
    ///
    /// Does nothing unless the loop is idle. On exit, pending work is
    /// released and failed, and the engine context is detached. A fault that
    /// terminated the loop is returned.
    pub async fn run(&mut self) -> Result<(), Fault> {
        if !self.shared.begin() {
            tracing::debug!(status = ?self.status(), "event loop not idle, run ignored");
            return Ok(());
        }
        tracing::debug!("event loop running");

        let result = self.run_until_stopped().await;
        if let Err(fault) = &result {
            tracing::error!(%fault, "event loop terminated by fault");
        }
        self.shutdown();
        self.engine.clear_current_context();

        if let Err(fault) = &result {
            if let Some(hook) = self.on_terminated.take() {
                hook(fault);
            }
        }
        tracing::debug!("event loop stopped");
        result
    }

    fn is_running(&self) -> bool {
        self.shared.status() == LoopStatus::Running
    }

    async fn run_until_stopped(&mut self) -> Result<(), Fault> {
        while self.is_running() {
            let wait = self.guarded(|this| {
                this.drain_microtasks()?;
                this.drain_macrotasks()
            })?;
            self.wait_for_tasks(wait).await;
        }
        Ok(())
    }

    /// Turn a panic inside a scheduling step into a fatal fault.
    fn guarded<R>(&mut self, step: impl FnOnce(&mut Self) -> Result<R, Fault>) -> Result<R, Fault> {
        match panic::catch_unwind(AssertUnwindSafe(|| step(self))) {
            Ok(result) => result,
            Err(payload) => Err(Fault::fatal(format!(
                "event loop panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    fn drain_microtasks(&mut self) -> Result<(), Fault> {
        while self.is_running() {
            let Some(mut entry) = self.microtasks.pop_front() else {
                break;
            };
            if entry.task.is_pending_job() {
                self.job_queued = false;
            }
            let result = entry.task.execute(self.engine);
            entry.task.release();
            self.unregister(&entry.task);
            self.settle(&mut entry.completion, result)?;
            self.queue_pending_job();
        }
        Ok(())
    }

    /// Returns how long the loop may wait before the next macrotask is due.
    ///
    /// Repeating tasks go back into the set only after the pass, so a
    /// zero-interval timer runs once per pass and queued work still gets in.
    fn drain_macrotasks(&mut self) -> Result<Option<Duration>, Fault> {
        let mut rescheduled = Vec::new();
        let result = self.run_ready_macrotasks(&mut rescheduled);
        for entry in rescheduled {
            self.macrotasks.insert(entry);
        }

        match result? {
            true => Ok(Some(Duration::ZERO)),
            false if !self.is_running() => Ok(Some(Duration::ZERO)),
            false => Ok(self.macrotasks.next_due_in()),
        }
    }

    /// Run the macrotasks that are due. Returns `true` when it stopped early
    /// to let queued microtasks run.
    fn run_ready_macrotasks(&mut self, rescheduled: &mut Vec<Entry>) -> Result<bool, Fault> {
        while self.is_running() {
            let Some(mut entry) = self.macrotasks.pop_ready() else {
                break;
            };
            let result = entry.task.execute(self.engine);
            let reschedule = entry.task.should_reschedule();
            self.settle(&mut entry.completion, result)?;
            if reschedule {
                entry.task.reset_scheduled_time();
                rescheduled.push(entry);
            } else {
                self.unregister(&entry.task);
            }

            self.queue_pending_job();
            if !self.microtasks.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn wait_for_tasks(&mut self, wait: Option<Duration>) {
        let wait = if self.take_local() > 0 {
            Some(Duration::ZERO)
        } else {
            wait
        };
        if !self.is_running() {
            return;
        }

        let Some(envelope) = self.shared.queue.dequeue_async(wait).await else {
            return;
        };
        self.accept(envelope);
        while let Some(envelope) = self.shared.queue.try_dequeue() {
            self.accept(envelope);
        }
    }

    /// Move tasks scheduled on the worker into the loop.
    fn take_local(&mut self) -> usize {
        let entries: Vec<Entry> = self.local.inbox.borrow_mut().drain(..).collect();
        let count = entries.len();
        for entry in entries {
            self.classify(entry);
        }
        count
    }

    fn accept(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Run(job, completion) => {
                let entry = Entry {
                    task: job.into_task(),
                    completion,
                };
                if self.engine.is_current_valid() {
                    self.classify(entry);
                } else {
                    entry.discard(UsageFault::NoCurrentContext.into());
                }
            }
            Envelope::Cancel(id) => {
                self.local.cancel(id);
            }
        }
    }

    fn classify(&mut self, entry: Entry) {
        if entry.task.is_microtask() {
            self.microtasks.push_back(entry);
        } else {
            self.macrotasks.insert(entry);
        }
    }

    fn unregister(&self, task: &Task) {
        if let Some(id) = task.id() {
            self.local.registry.borrow_mut().remove(id);
        }
    }

    /// Complete an entry. Terminal faults are handed back to stop the loop.
    fn settle(&mut self, completion: &mut Completion, result: TaskResult) -> Result<(), Fault> {
        let terminal = match &result {
            Err(fault) if fault.is_recoverable() => {
                tracing::warn!(%fault, kind = %fault.kind(), "task failed");
                if let Some(hook) = self.on_task_failed.as_mut() {
                    hook(fault);
                }
                None
            }
            Err(fault) => Some(fault.clone()),
            Ok(_) => None,
        };
        completion.complete(result);
        match terminal {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    /// Queue one microtask to run the engine's next promise job.
    fn queue_pending_job(&mut self) {
        if !self.job_queued && self.engine.has_pending_job() {
            self.microtasks.push_back(Entry::new(Task::pending_job()));
            self.job_queued = true;
        }
    }

    /// Terminate and fail everything still pending. Idempotent.
    fn shutdown(&mut self) {
        self.shared.terminate();

        let mut discarded = 0usize;
        let local: Vec<Entry> = self.local.inbox.borrow_mut().drain(..).collect();
        for entry in self
            .microtasks
            .drain(..)
            .chain(self.macrotasks.drain())
            .chain(local)
        {
            entry.discard(UsageFault::LoopTerminated.into());
            discarded += 1;
        }
        while let Some(envelope) = self.shared.queue.try_dequeue() {
            if let Envelope::Run(_, mut completion) = envelope {
                completion.complete(Err(UsageFault::LoopTerminated.into()));
                discarded += 1;
            }
        }
        self.local.registry.borrow_mut().clear();
        self.job_queued = false;

        if discarded > 0 {
            tracing::debug!(discarded, "discarded pending tasks");
        }
    }
}

impl Drop for EventLoop<'_> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests;
