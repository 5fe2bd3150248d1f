//! Executor: the public, thread-safe face of one script engine.
//!
//! An [`Executor`] owns a worker thread (via the [`pump`](crate::pump)) on
//! which the engine is created, host callbacks are installed and the
//! [`EventLoop`] runs. Every public method may be called from any thread;
//! work is submitted through the loop's queue and results come back as
//! [`TaskFuture`]s.
//!
//! Disposal stops the loop, joins the worker and, on the worker, releases the
//! engine context before the runtime. After disposal every operation fails
//! with [`UsageFault::Disposed`] without reaching the engine.

use crate::config::ExecutorConfig;
use crate::event_loop::{EventLoop, LoopHandle, LoopStatus, TaskFuture};
use crate::host::{self, HostBridge, HostEvents};
use crate::pump::{self, PumpHandle};
use crate::task::{Job, TaskId};
use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tether_engine::{Engine, Fault, NativeArg, ScriptValue, SourceContext, UsageFault};

/// Thread-safe handle to one engine instance and its event loop.
pub struct Executor {
    handle: LoopHandle,
    events: Arc<HostEvents>,
    pump: Mutex<Option<PumpHandle<()>>>,
    worker: thread::ThreadId,
    disposed: AtomicBool,
    source_context: AtomicU64,
}

impl Executor {
    /// Start an executor with the default configuration.
    pub fn new() -> Result<Self, Fault> {
        Self::with_config(ExecutorConfig::default())
    }

    /// Start an executor. Returns once the engine is ready, or with the
    /// fault that prevented it from starting.
    pub fn with_config(config: ExecutorConfig) -> Result<Self, Fault> {
        let handle = LoopHandle::new();
        let events = Arc::new(HostEvents::default());
        let (ready_tx, ready_rx) = channel::bounded(1);

        let thread_name = config.thread_name.clone();
        let pump = {
            let handle = handle.clone();
            let events = Arc::clone(&events);
            pump::spawn(&thread_name, move || worker_main(config, handle, events, ready_tx))
                .map_err(|e| Fault::fatal(format!("failed to spawn worker thread: {}", e)))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(fault)) => {
                let _ = pump.join();
                return Err(fault);
            }
            Err(_) => {
                return Err(pump
                    .join()
                    .err()
                    .unwrap_or_else(|| Fault::fatal("worker exited before becoming ready")));
            }
        }

        tracing::debug!(thread = %thread_name, "executor started");
        Ok(Self {
            handle,
            events,
            worker: pump.thread_id(),
            pump: Mutex::new(Some(pump)),
            disposed: AtomicBool::new(false),
            source_context: AtomicU64::new(0),
        })
    }

    /// Run `source` as a global script.
    pub fn run_script_async(&self, source: impl Into<String>) -> TaskFuture {
        self.submit_script(source.into(), None)
    }

    /// Run `source`, reporting `path` as its file name in script faults.
    pub fn run_script_with_path_async(
        &self,
        source: impl Into<String>,
        path: impl Into<String>,
    ) -> TaskFuture {
        self.submit_script(source.into(), Some(path.into()))
    }

    /// Read a script file on the calling thread and run it.
    ///
    /// An empty file resolves to `undefined` without reaching the loop.
    pub fn run_script_file_async(&self, path: impl AsRef<Path>) -> TaskFuture {
        if let Err(fault) = self.ensure_live() {
            return TaskFuture::failed(fault);
        }
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(source) if source.trim().is_empty() => TaskFuture::ready(Ok(ScriptValue::Undefined)),
            Ok(source) => self.submit_script(source, Some(path.display().to_string())),
            Err(e) => TaskFuture::failed(UsageFault::InvalidArgument(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Call the global function `name` with host arguments.
    pub fn call_function_async<I>(&self, name: impl Into<String>, args: I) -> TaskFuture
    where
        I: IntoIterator,
        I::Item: Into<NativeArg>,
    {
        self.push(Job::call(name, args))
    }

    /// Submit an arbitrary job (delayed, repeating or microtask).
    pub fn push(&self, job: Job) -> TaskFuture {
        match self.ensure_live() {
            Ok(()) => self.handle.push(job),
            Err(fault) => TaskFuture::failed(fault),
        }
    }

    /// Cancel a timer by the id a script received from `setTimeout` or
    /// `setInterval`.
    pub fn cancel(&self, id: TaskId) -> Result<bool, Fault> {
        self.ensure_live()?;
        Ok(self.handle.cancel(id))
    }

    /// Subscribe to messages scripts send with `sendToHost`.
    ///
    /// Handlers run on the worker thread and must not block on this
    /// executor's futures.
    pub fn on_message(&self, handler: impl Fn(&str) + Send + Sync + 'static) -> Result<(), Fault> {
        self.ensure_live()?;
        self.events.on_message(Arc::new(handler));
        Ok(())
    }

    /// Subscribe to task failures and loop termination reports.
    pub fn on_execution_failed(
        &self,
        handler: impl Fn(&str) + Send + Sync + 'static,
    ) -> Result<(), Fault> {
        self.ensure_live()?;
        self.events.on_execution_failed(Arc::new(handler));
        Ok(())
    }

    pub fn status(&self) -> LoopStatus {
        self.handle.status()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Stop the loop and join the worker. Idempotent.
    ///
    /// The call that joins the worker returns the fault that terminated the
    /// loop, if any. Concurrent calls block until that join has finished.
    pub fn dispose(&self) -> Result<(), Fault> {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            tracing::debug!("disposing executor");
            self.handle.stop();
        }
        if thread::current().id() == self.worker {
            // Disposed from a handler on the worker itself; it exits once
            // the handler returns and a later call from outside joins it.
            return Ok(());
        }

        let mut pump = self.pump.lock();
        match pump.take() {
            Some(worker) => worker.join(),
            None => Ok(()),
        }
    }

    fn ensure_live(&self) -> Result<(), Fault> {
        if self.is_disposed() {
            Err(UsageFault::Disposed.into())
        } else {
            Ok(())
        }
    }

    fn submit_script(&self, source: String, path: Option<String>) -> TaskFuture {
        let source_context = SourceContext(self.source_context.fetch_add(1, Ordering::Relaxed));
        self.push(Job::script(source, path, source_context))
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if let Err(fault) = self.dispose() {
            tracing::warn!(%fault, "executor stopped with a fault");
        }
    }
}

/// Creates executors. Each call yields an isolated engine.
pub trait ExecutorFactory {
    fn create_executor(&self) -> Result<Executor, Fault>;
}

impl ExecutorFactory for ExecutorConfig {
    fn create_executor(&self) -> Result<Executor, Fault> {
        Executor::with_config(self.clone())
    }
}

/// Worker thread body: own the engine for the executor's whole life.
async fn worker_main(
    config: ExecutorConfig,
    handle: LoopHandle,
    events: Arc<HostEvents>,
    ready: Sender<Result<(), Fault>>,
) -> Result<(), Fault> {
    let engine = match Engine::new(&config.engine) {
        Ok(engine) => engine,
        Err(fault) => {
            let _ = ready.send(Err(fault.clone()));
            return Err(fault);
        }
    };
    engine.set_current_context();

    let mut event_loop = EventLoop::with_handle(&engine, handle);
    {
        let events = Arc::clone(&events);
        event_loop.on_task_failed(move |fault| events.emit_failure(&fault.to_string()));
    }
    {
        let events = Arc::clone(&events);
        event_loop.on_terminated(move |fault| {
            events.emit_failure(&format!("event loop terminated: {}", fault))
        });
    }

    let bridge = HostBridge::new(event_loop.scheduler(), events, config.min_interval());
    let result = match host::install(&engine, bridge, config.console) {
        Ok(()) => {
            let _ = ready.send(Ok(()));
            event_loop.run().await
        }
        Err(fault) => {
            let _ = ready.send(Err(fault.clone()));
            Err(fault)
        }
    };

    drop(event_loop);
    // run() detaches on its own, but not if the loop was stopped before it
    // ever started.
    engine.clear_current_context();
    engine.dispose();
    result
}
