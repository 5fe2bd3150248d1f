//! Tether engine binding
//!
//! Thin layer over QuickJS (`rquickjs`) that the scheduler builds on:
//! - [`Engine`]: the runtime/context pair with an explicit current-context state
//! - [`JsRef`]: guarded handles keeping engine values alive across calls
//! - [`ScriptValue`] / [`NativeArg`]: owned values crossing the boundary
//! - [`Fault`]: the four-kind error taxonomy and native error mapping

pub mod engine;
pub mod fault;
pub mod handle;
pub mod value;

pub use engine::{ContextFlag, Engine, EngineOptions};
pub use fault::{EngineFault, EngineResult, Fault, FaultKind, ScriptError, UsageFault};
pub use handle::{FunctionRef, JsRef, ValueRef};
pub use value::{NativeArg, ScriptValue, SourceContext};

/// Re-exported so dependents use the same binding version.
pub use rquickjs;
