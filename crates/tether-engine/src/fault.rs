//! Fault taxonomy for engine operations.
//!
//! Every native call made through this crate returns `Result<_, Fault>`.
//! A fault is one of four kinds: usage (caller error), engine (resource
//! exhaustion), script (uncaught exception or compile error) and fatal
//! (unrecoverable state). Usage and script faults are recoverable; the
//! other two mean the engine instance can no longer be trusted.

use rquickjs::convert::Coerced;
use rquickjs::Ctx;
use std::fmt;

/// Message QuickJS uses for its internal allocation failure exception.
const OUT_OF_MEMORY_MESSAGE: &str = "out of memory";

/// File name QuickJS gives every script evaluated without one.
pub const EVAL_FILE_NAME: &str = "eval_script";

/// Classification of a [`Fault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    Usage,
    Engine,
    Script,
    Fatal,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::Usage => "usage",
            FaultKind::Engine => "engine",
            FaultKind::Script => "script",
            FaultKind::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Errors raised by the engine binding and the scheduler built on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Fault {
    /// Caller error, always recoverable
    #[error("usage fault: {0}")]
    Usage(#[from] UsageFault),

    /// Resource exhaustion; the engine instance is compromised
    #[error("engine fault: {0}")]
    Engine(#[from] EngineFault),

    /// Uncaught script exception or compile error
    #[error("script fault: {0}")]
    Script(#[from] ScriptError),

    /// Corrupted or unrecoverable engine state
    #[error("fatal fault: {0}")]
    Fatal(String),
}

/// Caller errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageFault {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid function: {0}")]
    InvalidFunction(String),

    /// A guarded handle was used after it was released
    #[error("engine value reference is no longer valid")]
    InvalidReference,

    #[error("no current script context on this thread")]
    NoCurrentContext,

    #[error("executor has been disposed")]
    Disposed,

    #[error("event loop has terminated")]
    LoopTerminated,

    /// Conversion or calling convention error reported by the binding
    #[error("{0}")]
    Binding(String),
}

/// Engine resource faults.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineFault {
    #[error("out of memory")]
    OutOfMemory,
}

/// An uncaught script exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub stack: Option<String>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: None,
            line: None,
            stack: None,
        }
    }

    /// Take the exception currently pending on `ctx`.
    pub fn caught(ctx: &Ctx<'_>) -> Self {
        let value = ctx.catch();
        if let Some(exception) = value.as_exception() {
            let stack = exception.stack();
            // `lineNumber` is only set for compile errors
            let line = exception
                .line()
                .and_then(|line| u32::try_from(line).ok())
                .or_else(|| stack.as_deref().and_then(line_from_stack));
            return Self {
                message: exception.message().unwrap_or_default(),
                file: exception.file(),
                line,
                stack,
            };
        }
        // `throw "text"` and friends carry no Error object
        let message = value
            .get::<Coerced<String>>()
            .map(|coerced| coerced.0)
            .unwrap_or_else(|_| "uncaught exception".to_string());
        Self::new(message)
    }

    /// Fill in `file` when the engine did not report a real one.
    pub fn with_default_file(mut self, path: Option<&str>) -> Self {
        let unnamed = self
            .file
            .as_deref()
            .map_or(true, |file| file.is_empty() || file == EVAL_FILE_NAME);
        if unnamed && path.is_some() {
            self.file = path.map(str::to_string);
        }
        self
    }
}

/// Line of the innermost script frame in a QuickJS stack trace.
///
/// Frames read `    at name (file:line)` or `    at name (file:line:column)`;
/// native frames carry no position and are skipped.
fn line_from_stack(stack: &str) -> Option<u32> {
    stack.lines().find_map(|frame| {
        let open = frame.rfind('(')?;
        let close = open + frame[open..].find(')')?;
        let mut parts = frame[open + 1..close].rsplit(':');
        let last = parts.next()?.parse::<u32>().ok()?;
        match parts.next().map(str::parse::<u32>) {
            Some(Ok(line)) => Some(line),
            _ => Some(last),
        }
    })
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, " ({}:{})", file, line),
            (Some(file), None) => write!(f, " ({})", file),
            (None, Some(line)) => write!(f, " (line {})", line),
            (None, None) => Ok(()),
        }
    }
}

impl std::error::Error for ScriptError {}

impl Fault {
    pub fn usage(fault: UsageFault) -> Self {
        Fault::Usage(fault)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Fault::Fatal(message.into())
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            Fault::Usage(_) => FaultKind::Usage,
            Fault::Engine(_) => FaultKind::Engine,
            Fault::Script(_) => FaultKind::Script,
            Fault::Fatal(_) => FaultKind::Fatal,
        }
    }

    /// Usage and script faults leave the engine usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), FaultKind::Usage | FaultKind::Script)
    }

    /// Map a binding error raised while `ctx` was entered.
    ///
    /// For [`rquickjs::Error::Exception`] the pending exception is taken from
    /// the context, so this must be called before anything else runs on it.
    pub fn from_js(ctx: &Ctx<'_>, error: rquickjs::Error) -> Self {
        match error {
            rquickjs::Error::Exception => {
                let caught = ScriptError::caught(ctx);
                if caught.message == OUT_OF_MEMORY_MESSAGE {
                    Fault::Engine(EngineFault::OutOfMemory)
                } else {
                    Fault::Script(caught)
                }
            }
            other => Self::from_setup(other),
        }
    }

    /// Reclassify a fault raised while the heap was at its limit.
    ///
    /// When QuickJS cannot allocate its own error object the pending
    /// exception is a bare value without a stack, which would otherwise read
    /// as an ordinary script fault.
    pub fn under_memory_pressure(self) -> Self {
        match self {
            Fault::Script(ref error) if error.stack.is_none() => {
                Fault::Engine(EngineFault::OutOfMemory)
            }
            other => other,
        }
    }

    /// Map a binding error raised outside any context.
    pub fn from_setup(error: rquickjs::Error) -> Self {
        match error {
            rquickjs::Error::Allocation => Fault::Engine(EngineFault::OutOfMemory),
            other => Fault::Usage(UsageFault::Binding(other.to_string())),
        }
    }
}

/// Result alias used throughout the engine binding.
pub type EngineResult<T> = Result<T, Fault>;
