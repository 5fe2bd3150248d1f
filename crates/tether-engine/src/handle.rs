//! Guarded handles to engine values.
//!
//! A [`JsRef`] keeps an engine value alive beyond the native frame that
//! produced it. Saving increments the engine's reference count, and the count
//! is decremented exactly once, either by [`JsRef::release`] or on drop.
//! The handle is `!Send`, so the decrement always happens on the thread that
//! owns the engine.

use crate::fault::{EngineResult, Fault, UsageFault};
use rquickjs::{Ctx, Function, Outlive, Persistent, Value};
use std::marker::PhantomData;

/// Guarded handle to an engine value of type `T`.
pub struct JsRef<T> {
    inner: Option<Persistent<T>>,
    _not_send: PhantomData<*const ()>,
}

/// Handle to a script function.
pub type FunctionRef = JsRef<Function<'static>>;

/// Handle to any script value.
pub type ValueRef = JsRef<Value<'static>>;

impl<T> JsRef<T> {
    /// A handle that refers to nothing. Restoring it fails.
    pub fn invalid() -> Self {
        Self {
            inner: None,
            _not_send: PhantomData,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Drop the engine reference now. Later calls are no-ops.
    pub fn release(&mut self) {
        self.inner = None;
    }
}

impl<T> JsRef<T>
where
    T: Outlive<'static> + Clone,
{
    /// Get the value back inside `ctx` without consuming the handle.
    pub fn restore<'js>(&self, ctx: &Ctx<'js>) -> EngineResult<T::Target<'js>> {
        let persistent = self
            .inner
            .as_ref()
            .ok_or(Fault::Usage(UsageFault::InvalidReference))?;
        persistent
            .clone()
            .restore(ctx)
            .map_err(|e| Fault::from_js(ctx, e))
    }
}

impl FunctionRef {
    pub fn function<'js>(ctx: &Ctx<'js>, function: Function<'js>) -> Self {
        Self {
            inner: Some(Persistent::save(ctx, function)),
            _not_send: PhantomData,
        }
    }
}

impl ValueRef {
    pub fn value<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Self {
        Self {
            inner: Some(Persistent::save(ctx, value)),
            _not_send: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for JsRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsRef")
            .field("valid", &self.is_valid())
            .finish()
    }
}

