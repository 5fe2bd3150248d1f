//! Engine handle pair (runtime + context).
//!
//! An [`Engine`] owns one QuickJS runtime and one full context on it. It is
//! `!Send`: the thread that creates it is the only thread that may touch it.
//! On top of that, the engine tracks whether its context is *current*, and
//! every operation fails with [`UsageFault::NoCurrentContext`] while it is
//! detached. The scheduler attaches the context when it starts and detaches
//! it when it stops, so nothing can run script after shutdown has begun.

use crate::fault::{EngineResult, Fault, UsageFault};
use crate::value::{ScriptValue, SourceContext};
use rquickjs::{Context, Ctx, Runtime, Value};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::rc::Rc;

/// Resource limits applied to a new runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Heap limit in bytes
    pub memory_limit: Option<usize>,
    /// Native stack limit in bytes
    pub max_stack_size: Option<usize>,
    /// Allocation volume that triggers a GC cycle, in bytes
    pub gc_threshold: Option<usize>,
}

/// Shared view of whether an engine's context is current.
///
/// Worker-local components hold this instead of the engine itself so that
/// no reference cycle forms through host callbacks.
#[derive(Debug, Clone, Default)]
pub struct ContextFlag(Rc<Cell<bool>>);

impl ContextFlag {
    pub fn is_current(&self) -> bool {
        self.0.get()
    }

    fn set(&self, current: bool) {
        self.0.set(current);
    }
}

/// A QuickJS runtime and context, bound to the creating thread.
pub struct Engine {
    // Field order matters: the context must be freed before the runtime.
    context: Context,
    runtime: Runtime,
    current: ContextFlag,
    memory_limit: Option<usize>,
}

impl Engine {
    /// Create a runtime with `options` and a full context on it.
    ///
    /// The context starts detached.
    pub fn new(options: &EngineOptions) -> EngineResult<Self> {
        let runtime = Runtime::new().map_err(Fault::from_setup)?;
        if let Some(limit) = options.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(limit) = options.max_stack_size {
            runtime.set_max_stack_size(limit);
        }
        if let Some(threshold) = options.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }
        let context = Context::full(&runtime).map_err(Fault::from_setup)?;

        tracing::debug!(?options, "engine created");
        Ok(Self {
            context,
            runtime,
            current: ContextFlag::default(),
            memory_limit: options.memory_limit,
        })
    }

    /// Make this engine's context current.
    pub fn set_current_context(&self) {
        self.current.set(true);
    }

    /// Detach the context. Operations fail until it is made current again.
    pub fn clear_current_context(&self) {
        self.current.set(false);
    }

    pub fn is_current_valid(&self) -> bool {
        self.current.is_current()
    }

    pub fn context_flag(&self) -> ContextFlag {
        self.current.clone()
    }

    /// Enter the context. Binding errors inside `f` should be mapped with
    /// [`Fault::from_js`] while the context is still available.
    pub fn with<R>(&self, f: impl for<'js> FnOnce(Ctx<'js>) -> EngineResult<R>) -> EngineResult<R> {
        if !self.is_current_valid() {
            return Err(UsageFault::NoCurrentContext.into());
        }
        match self.context.with(f) {
            Err(fault @ Fault::Script(_)) if self.is_over_memory_budget() => {
                tracing::warn!(%fault, "exception raised at the memory limit");
                Err(fault.under_memory_pressure())
            }
            other => other,
        }
    }

    /// Whether the heap has grown to within a tenth of its configured limit.
    fn is_over_memory_budget(&self) -> bool {
        let Some(limit) = self.memory_limit else {
            return false;
        };
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.runtime.memory_usage().malloc_size >= limit - limit / 10
    }

    /// Evaluate `source` as a global script.
    ///
    /// The binding evaluates every global script under QuickJS's own file
    /// name, so stack traces read `eval_script`. `path` and `source_context`
    /// are diagnostic only: `path` replaces that placeholder in the fault's
    /// file name and `source_context` is traced.
    pub fn run_script(
        &self,
        source: &str,
        source_context: SourceContext,
        path: Option<&str>,
    ) -> EngineResult<ScriptValue> {
        tracing::trace!(%source_context, path, "running script");
        self.with(|ctx| {
            let value: Value = ctx.eval(source).map_err(|e| match Fault::from_js(&ctx, e) {
                Fault::Script(error) => Fault::Script(error.with_default_file(path)),
                other => other,
            })?;
            ScriptValue::from_js(&ctx, &value)
        })
    }

    /// Whether promise reactions are waiting to run.
    pub fn has_pending_job(&self) -> bool {
        self.is_current_valid() && self.runtime.is_job_pending()
    }

    /// Run one pending promise reaction. Returns whether a job ran.
    pub fn run_pending_job(&self) -> EngineResult<bool> {
        if !self.is_current_valid() {
            return Err(UsageFault::NoCurrentContext.into());
        }
        match self.runtime.execute_pending_job() {
            Ok(ran) => Ok(ran),
            Err(_) => {
                let fault = self
                    .context
                    .with(|ctx| Fault::from_js(&ctx, rquickjs::Error::Exception));
                if self.is_over_memory_budget() {
                    Err(fault.under_memory_pressure())
                } else {
                    Err(fault)
                }
            }
        }
    }

    pub fn collect_garbage(&self) {
        self.runtime.run_gc();
    }

    /// Detach and free the context, then the runtime.
    pub fn dispose(self) {
        let Engine {
            context,
            runtime,
            current,
            ..
        } = self;
        current.set(false);
        drop(context);
        drop(runtime);
        tracing::debug!("engine disposed");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("current", &self.is_current_valid())
            .finish_non_exhaustive()
    }
}
