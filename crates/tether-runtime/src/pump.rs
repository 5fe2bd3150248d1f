//! Cooperative thread pump
//!
//! Runs an async entry point to completion on one dedicated thread. The
//! thread drives a single-threaded tokio runtime inside a [`LocalSet`], so
//! every continuation the entry point schedules (including tasks spawned
//! with [`tokio::task::spawn_local`]) runs on that same thread. The entry
//! future does not need to be `Send`.

use std::future::Future;
use std::io;
use std::thread::{self, JoinHandle};
use tether_engine::Fault;
use tokio::task::LocalSet;

/// Handle to a running pump thread.
pub struct PumpHandle<T> {
    thread: JoinHandle<Result<T, Fault>>,
}

/// Spawn a pump thread named `name` running `entry`.
///
/// `entry` is called on the new thread, so the future it returns may hold
/// thread-bound state.
pub fn spawn<F, Fut, T>(name: &str, entry: F) -> io::Result<PumpHandle<T>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, Fault>> + 'static,
    T: Send + 'static,
{
    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || -> Result<T, Fault> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| Fault::fatal(format!("failed to start pump runtime: {}", e)))?;
            let local = LocalSet::new();
            tracing::debug!("pump started");
            let result = local.block_on(&runtime, entry());
            tracing::debug!(ok = result.is_ok(), "pump finished");
            result
        })?;
    Ok(PumpHandle { thread })
}

impl<T> PumpHandle<T> {
    /// Wait for the entry point to finish and return its result.
    ///
    /// A panic on the pump thread is reported as a fatal fault.
    pub fn join(self) -> Result<T, Fault> {
        let name = self.thread_name().to_string();
        match self.thread.join() {
            Ok(result) => result,
            Err(payload) => Err(Fault::fatal(format!(
                "pump thread '{}' panicked: {}",
                name,
                panic_message(payload.as_ref())
            ))),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn thread_name(&self) -> &str {
        self.thread.thread().name().unwrap_or("<unnamed>")
    }

    pub fn thread_id(&self) -> thread::ThreadId {
        self.thread.thread().id()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;
    use tether_engine::{FaultKind, UsageFault};

    #[test]
    fn test_pump_runs_entry_on_named_thread() {
        let caller = thread::current().id();
        let pump = spawn("tether-test-pump", move || async move {
            let current = thread::current();
            assert_ne!(current.id(), caller);
            Ok(current.name().map(str::to_string))
        })
        .unwrap();

        assert_eq!(pump.thread_name(), "tether-test-pump");
        assert_eq!(pump.join().unwrap().as_deref(), Some("tether-test-pump"));
    }

    #[test]
    fn test_pump_continuations_stay_on_worker() {
        let pump = spawn("tether-test-pump", || async {
            let worker = thread::current().id();
            // Rc is not Send: this only compiles because the entry is local
            let seen = Rc::new(RefCell::new(Vec::new()));

            let mut tasks = Vec::new();
            for i in 0..3 {
                let seen = Rc::clone(&seen);
                tasks.push(tokio::task::spawn_local(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    seen.borrow_mut().push((i, thread::current().id()));
                }));
            }
            for task in tasks {
                task.await.expect("local task should complete");
            }

            let seen = seen.borrow();
            assert_eq!(seen.len(), 3);
            let all_on_worker = seen.iter().all(|(_, id)| *id == worker);
            Ok(all_on_worker)
        })
        .unwrap();

        assert!(pump.join().unwrap());
    }

    #[test]
    fn test_pump_propagates_entry_fault() {
        let pump = spawn("tether-test-pump", || async {
            Err::<(), _>(Fault::usage(UsageFault::LoopTerminated))
        })
        .unwrap();
        assert_eq!(
            pump.join().unwrap_err(),
            Fault::usage(UsageFault::LoopTerminated)
        );
    }

    #[test]
    fn test_pump_panic_is_fatal() {
        let pump = spawn("tether-test-pump", || async {
            if true {
                panic!("worker exploded");
            }
            Ok(())
        })
        .unwrap();

        let fault = pump.join().unwrap_err();
        assert_eq!(fault.kind(), FaultKind::Fatal);
        assert!(fault.to_string().contains("worker exploded"));
    }
}
