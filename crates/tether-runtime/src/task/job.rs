//! Host-side work descriptions.

use super::{FunctionCall, ScriptRun, Task};
use std::time::{Duration, Instant};
use tether_engine::{NativeArg, SourceContext};

/// What a [`Job`] runs.
#[derive(Debug, Clone)]
pub enum JobKind {
    Call { name: String, args: Vec<NativeArg> },
    Script {
        source: String,
        path: Option<String>,
        source_context: SourceContext,
    },
}

/// Work requested from any thread. Converted into a [`Task`] on the worker.
///
/// The delay counts from when the job was created, not from when the worker
/// picks it up.
#[derive(Debug, Clone)]
pub struct Job {
    kind: JobKind,
    delay: Duration,
    repeat: bool,
    promise: bool,
    created_at: Instant,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            delay: Duration::ZERO,
            repeat: false,
            promise: false,
            created_at: Instant::now(),
        }
    }

    /// Call the global function `name`.
    pub fn call<I>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<NativeArg>,
    {
        Self::new(JobKind::Call {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        })
    }

    pub fn script(source: impl Into<String>, path: Option<String>, source_context: SourceContext) -> Self {
        Self::new(JobKind::Script {
            source: source.into(),
            path,
            source_context,
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Run as a microtask (promise continuation) instead of a macrotask.
    pub fn microtask(mut self) -> Self {
        self.promise = true;
        self
    }

    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    pub fn is_microtask(&self) -> bool {
        self.promise
    }

    pub(crate) fn into_task(self) -> Task {
        let mut task = match self.kind {
            JobKind::Call { name, args } => Task::call(FunctionCall::deferred(name, args)),
            JobKind::Script {
                source,
                path,
                source_context,
            } => Task::script(ScriptRun::new(source, path, source_context)),
        }
        .with_delay_from(self.delay, self.created_at);
        if self.repeat {
            task = task.repeating();
        }
        if self.promise {
            task = task.microtask();
        }
        task
    }
}
