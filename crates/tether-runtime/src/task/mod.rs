//! Schedulable tasks
//!
//! A [`Task`] is one unit of work for the event loop: a function call, a
//! script run, or a pending promise job. Tasks may hold engine handles, so
//! they are worker-only (`!Send`). Host threads describe work with a [`Job`],
//! which is `Send` and becomes a `Task` once it reaches the worker.

mod function;
mod job;
mod script;

pub use function::FunctionCall;
pub use job::{Job, JobKind};
pub use script::ScriptRun;

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tether_engine::{Engine, EngineResult, ScriptValue, UsageFault};

/// Identity of a cancellable task, as seen by scripts and hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u32);

impl TaskId {
    /// Largest identity handed out; keeps ids positive script integers.
    pub const MAX: u32 = i32::MAX as u32;

    /// Interpret a script-supplied number as a task id.
    pub fn from_script(value: f64) -> Option<Self> {
        if value.is_finite() && value >= 1.0 && value <= f64::from(Self::MAX) && value.fract() == 0.0 {
            Some(TaskId(value as u32))
        } else {
            None
        }
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared cancellation flag between a task and the registry.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Rc<Cell<bool>>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.set(true);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.get()
    }
}

/// What a task does when it runs.
pub enum TaskBody {
    Call(FunctionCall),
    Script(ScriptRun),
    /// Run one queued promise reaction
    PendingJob,
}

impl TaskBody {
    fn execute(&mut self, engine: &Engine) -> EngineResult<ScriptValue> {
        match self {
            TaskBody::Call(call) => call.execute(engine),
            TaskBody::Script(script) => script.execute(engine),
            TaskBody::PendingJob => engine.run_pending_job().map(|_| ScriptValue::Undefined),
        }
    }

    fn release(&mut self) {
        if let TaskBody::Call(call) = self {
            call.release();
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TaskBody::Call(_) => "call",
            TaskBody::Script(_) => "script",
            TaskBody::PendingJob => "pending-job",
        }
    }
}

/// One unit of work owned by the event loop.
pub struct Task {
    body: TaskBody,
    delay: Duration,
    scheduled_at: Instant,
    repeat: bool,
    promise: bool,
    canceled: CancelFlag,
    id: Option<TaskId>,
    released: bool,
}

impl Task {
    pub fn new(body: TaskBody) -> Self {
        Self {
            body,
            delay: Duration::ZERO,
            scheduled_at: Instant::now(),
            repeat: false,
            promise: false,
            canceled: CancelFlag::default(),
            id: None,
            released: false,
        }
    }

    pub fn call(call: FunctionCall) -> Self {
        Self::new(TaskBody::Call(call))
    }

    pub fn script(script: ScriptRun) -> Self {
        Self::new(TaskBody::Script(script))
    }

    /// Microtask that drains one promise reaction from the engine.
    pub fn pending_job() -> Self {
        Self::new(TaskBody::PendingJob).microtask()
    }

    /// Schedule `delay` after now.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self.scheduled_at = Instant::now() + delay;
        self
    }

    /// Schedule `delay` after `anchor` (usually when the work was requested).
    pub(crate) fn with_delay_from(mut self, delay: Duration, anchor: Instant) -> Self {
        self.delay = delay;
        self.scheduled_at = anchor + delay;
        self
    }

    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Mark as a promise continuation.
    pub fn microtask(mut self) -> Self {
        self.promise = true;
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn id(&self) -> Option<TaskId> {
        self.id
    }

    pub(crate) fn assign_id(&mut self, id: TaskId) {
        self.id = Some(id);
    }

    pub fn is_microtask(&self) -> bool {
        self.promise
    }

    pub fn is_pending_job(&self) -> bool {
        matches!(self.body, TaskBody::PendingJob)
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.canceled.clone()
    }

    /// Remaining time until the task is due, floored at zero.
    pub fn time_to_execution(&self) -> Duration {
        self.time_to_execution_at(Instant::now())
    }

    pub(crate) fn time_to_execution_at(&self, now: Instant) -> Duration {
        self.scheduled_at.saturating_duration_since(now)
    }

    pub fn is_ready(&self) -> bool {
        self.time_to_execution().is_zero()
    }

    /// Cancel the task. It will still pass through the loop, doing nothing.
    pub fn cancel(&mut self) {
        self.canceled.cancel();
        self.repeat = false;
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.is_canceled()
    }

    pub fn should_reschedule(&self) -> bool {
        self.repeat && !self.is_canceled()
    }

    /// Due time becomes now plus the task's delay.
    pub fn reset_scheduled_time(&mut self) {
        self.scheduled_at = Instant::now() + self.delay;
    }

    /// Run the task on the worker.
    ///
    /// Engine handles are released once the task will not run again.
    pub fn execute(&mut self, engine: &Engine) -> EngineResult<ScriptValue> {
        if !engine.is_current_valid() {
            return Err(UsageFault::NoCurrentContext.into());
        }

        let result = if self.is_canceled() {
            tracing::trace!(kind = self.body.label(), id = ?self.id, "skipping canceled task");
            Ok(ScriptValue::Undefined)
        } else {
            self.body.execute(engine)
        };

        if !self.should_reschedule() {
            self.release();
        }
        result
    }

    /// Release engine handles. Only the first call has an effect.
    pub fn release(&mut self) {
        if !self.released {
            self.body.release();
            self.released = true;
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.body.label())
            .field("id", &self.id)
            .field("delay", &self.delay)
            .field("repeat", &self.repeat)
            .field("promise", &self.promise)
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
