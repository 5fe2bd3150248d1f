//! Tether runtime
//!
//! Hosts an embedded script engine behind a thread-safe [`Executor`]. All
//! engine work happens on one worker thread; host threads submit work and
//! get [`TaskFuture`]s back.
//!
//! # Architecture
//!
//! - [`queue`]: blocking and async multi-producer work queue
//! - [`pump`]: dedicated thread driving a single-threaded async runtime
//! - [`task`]: units of work (calls, scripts, promise jobs, timers)
//! - [`event_loop`]: microtask/macrotask scheduling on the worker
//! - [`host`]: timer, messaging and console callbacks for scripts
//! - [`executor`]: the public facade tying it all together
//!
//! ```no_run
//! use tether_runtime::Executor;
//!
//! let executor = Executor::new().unwrap();
//! let value = executor
//!     .run_script_async("'Hello' + ' ' + 'world'")
//!     .wait()
//!     .unwrap();
//! assert_eq!(value.as_str(), Some("Hello world"));
//! ```

pub mod config;
pub mod event_loop;
pub mod executor;
pub mod host;
pub mod pump;
pub mod queue;
pub mod task;

pub use config::{ConfigError, ExecutorConfig};
pub use event_loop::{EventLoop, LoopHandle, LoopStatus, Scheduler, TaskFuture, TaskResult};
pub use executor::{Executor, ExecutorFactory};
pub use host::{EventHandler, HostEvents};
pub use queue::WorkQueue;
pub use task::{FunctionCall, Job, JobKind, ScriptRun, Task, TaskId};

pub use tether_engine::{
    Engine, EngineFault, EngineOptions, Fault, FaultKind, NativeArg, ScriptError, ScriptValue, SourceContext,
    UsageFault,
};
