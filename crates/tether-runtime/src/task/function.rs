//! Function-call task body.

use tether_engine::rquickjs::function::Rest;
use tether_engine::rquickjs::Value;
use tether_engine::{
    Engine, EngineResult, Fault, FunctionRef, NativeArg, ScriptValue, UsageFault, ValueRef,
};

/// Call of a script function.
pub enum FunctionCall {
    /// Handles captured on the worker, e.g. a timer callback and its arguments
    Bound {
        function: FunctionRef,
        args: Vec<ValueRef>,
    },
    /// A global function looked up by name, with host arguments converted on
    /// first execution
    Deferred { name: String, args: Vec<NativeArg> },
}

impl FunctionCall {
    pub fn bound(function: FunctionRef, args: Vec<ValueRef>) -> Self {
        FunctionCall::Bound { function, args }
    }

    pub fn deferred(name: impl Into<String>, args: Vec<NativeArg>) -> Self {
        FunctionCall::Deferred {
            name: name.into(),
            args,
        }
    }

    pub(crate) fn execute(&mut self, engine: &Engine) -> EngineResult<ScriptValue> {
        self.bind(engine)?;
        match self {
            FunctionCall::Bound { function, args } => invoke(engine, function, args),
            FunctionCall::Deferred { name, .. } => {
                Err(UsageFault::InvalidFunction(name.clone()).into())
            }
        }
    }

    /// Resolve a deferred call into handles, once.
    fn bind(&mut self, engine: &Engine) -> EngineResult<()> {
        let FunctionCall::Deferred { name, args } = self else {
            return Ok(());
        };
        let bound = engine.with(|ctx| {
            let value: Value = ctx
                .globals()
                .get(name.as_str())
                .map_err(|e| Fault::from_js(&ctx, e))?;
            let Some(function) = value.into_function() else {
                tracing::error!(function = %name, "not a callable global");
                return Err(UsageFault::InvalidFunction(name.clone()).into());
            };
            let args = args
                .iter()
                .map(|arg| arg.to_js(&ctx).map(|value| ValueRef::value(&ctx, value)))
                .collect::<EngineResult<Vec<_>>>()?;
            Ok(FunctionCall::Bound {
                function: FunctionRef::function(&ctx, function),
                args,
            })
        })?;
        *self = bound;
        Ok(())
    }

    pub(crate) fn release(&mut self) {
        if let FunctionCall::Bound { function, args } = self {
            function.release();
            for arg in args.iter_mut() {
                arg.release();
            }
        }
    }
}

fn invoke(engine: &Engine, function: &FunctionRef, args: &[ValueRef]) -> EngineResult<ScriptValue> {
    if !function.is_valid() {
        return Err(UsageFault::InvalidFunction("<released>".to_string()).into());
    }
    engine.with(|ctx| {
        let function = function.restore(&ctx)?;
        let args = args
            .iter()
            .map(|arg| arg.restore(&ctx))
            .collect::<EngineResult<Vec<_>>>()?;
        let value: Value = function
            .call((Rest(args),))
            .map_err(|e| Fault::from_js(&ctx, e))?;
        ScriptValue::from_js(&ctx, &value)
    })
}
