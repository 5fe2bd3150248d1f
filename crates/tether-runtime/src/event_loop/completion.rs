//! Completion side of a scheduled entry and the caller's future.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tether_engine::{Fault, ScriptValue, UsageFault};
use tokio::sync::oneshot;

/// Outcome of one task.
pub type TaskResult = Result<ScriptValue, Fault>;

/// Resolves a [`TaskFuture`]. Fires at most once; later calls are ignored.
#[derive(Debug, Default)]
pub(crate) struct Completion(Option<oneshot::Sender<TaskResult>>);

impl Completion {
    /// A completion nobody is waiting on (timers, promise jobs).
    pub fn none() -> Self {
        Completion(None)
    }

    pub fn channel() -> (Self, TaskFuture) {
        let (tx, rx) = oneshot::channel();
        (Completion(Some(tx)), TaskFuture::pending(rx))
    }

    pub fn complete(&mut self, result: TaskResult) {
        if let Some(tx) = self.0.take() {
            // The caller may have dropped its future
            let _ = tx.send(result);
        }
    }
}

enum FutureState {
    Pending(oneshot::Receiver<TaskResult>),
    Ready(Option<TaskResult>),
}

/// Result of a pushed task, resolved on the worker when the task completes.
///
/// Await it from async code, or call [`TaskFuture::wait`] from a plain
/// thread.
pub struct TaskFuture {
    state: FutureState,
}

impl TaskFuture {
    fn pending(rx: oneshot::Receiver<TaskResult>) -> Self {
        Self {
            state: FutureState::Pending(rx),
        }
    }

    /// An already resolved future.
    pub fn ready(result: TaskResult) -> Self {
        Self {
            state: FutureState::Ready(Some(result)),
        }
    }

    pub fn failed(fault: impl Into<Fault>) -> Self {
        Self::ready(Err(fault.into()))
    }

    /// Block the current thread until the task completes.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> TaskResult {
        match self.state {
            FutureState::Pending(rx) => rx.blocking_recv().unwrap_or_else(|_| dropped()),
            FutureState::Ready(result) => result.unwrap_or_else(dropped),
        }
    }
}

/// The worker went away without completing the entry.
fn dropped() -> TaskResult {
    Err(Fault::usage(UsageFault::LoopTerminated))
}

impl Future for TaskFuture {
    type Output = TaskResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            FutureState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or_else(|_| dropped())),
            FutureState::Ready(result) => Poll::Ready(result.take().unwrap_or_else(dropped)),
        }
    }
}

impl std::fmt::Debug for TaskFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            FutureState::Pending(_) => "pending",
            FutureState::Ready(_) => "ready",
        };
        f.debug_struct("TaskFuture").field("state", &state).finish()
    }
}
