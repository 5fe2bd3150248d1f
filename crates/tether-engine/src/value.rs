//! Host-side value types crossing the engine boundary.
//!
//! Engine values are tied to their context and thread. These types are the
//! owned, `Send` forms that travel between the worker and host threads.

use crate::fault::{EngineResult, Fault, UsageFault};
use rquickjs::{Ctx, IntoJs, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of a script evaluation or function call, copied out of the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScriptValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    Float(f64),
    String(String),
    /// Objects and arrays, through `JSON.stringify`
    Json(serde_json::Value),
    /// Values with no JSON form (functions, symbols)
    Opaque(String),
}

impl ScriptValue {
    /// Copy a value out of the engine.
    pub fn from_js<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> EngineResult<Self> {
        if value.is_undefined() {
            return Ok(ScriptValue::Undefined);
        }
        if value.is_null() {
            return Ok(ScriptValue::Null);
        }
        if let Some(b) = value.as_bool() {
            return Ok(ScriptValue::Bool(b));
        }
        if let Some(i) = value.as_int() {
            return Ok(ScriptValue::Int(i));
        }
        if let Some(f) = value.as_float() {
            return Ok(ScriptValue::Float(f));
        }
        if let Some(s) = value.as_string() {
            let s = s.to_string().map_err(|e| Fault::from_js(ctx, e))?;
            return Ok(ScriptValue::String(s));
        }
        if value.is_function() || value.is_symbol() {
            return Ok(ScriptValue::Opaque(value.type_name().to_string()));
        }

        let json = ctx
            .json_stringify(value.clone())
            .map_err(|e| Fault::from_js(ctx, e))?;
        match json {
            Some(json) => {
                let text = json.to_string().map_err(|e| Fault::from_js(ctx, e))?;
                serde_json::from_str(&text)
                    .map(ScriptValue::Json)
                    .map_err(|e| UsageFault::InvalidArgument(e.to_string()).into())
            }
            None => Ok(ScriptValue::Undefined),
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, ScriptValue::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric value, for either numeric representation.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Int(i) => Some(f64::from(*i)),
            ScriptValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Undefined => f.write_str("undefined"),
            ScriptValue::Null => f.write_str("null"),
            ScriptValue::Bool(b) => write!(f, "{}", b),
            ScriptValue::Int(i) => write!(f, "{}", i),
            ScriptValue::Float(x) => write!(f, "{}", x),
            ScriptValue::String(s) => f.write_str(s),
            ScriptValue::Json(json) => write!(f, "{}", json),
            ScriptValue::Opaque(kind) => write!(f, "[{}]", kind),
        }
    }
}

/// Host-native call argument, converted to an engine value on the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NativeArg {
    Bool(bool),
    Int(i32),
    Double(f64),
    String(String),
    /// Any other JSON document, rebuilt with `JSON.parse`
    Json(serde_json::Value),
}

impl NativeArg {
    pub fn to_js<'js>(&self, ctx: &Ctx<'js>) -> EngineResult<Value<'js>> {
        let converted = match self {
            NativeArg::Bool(b) => (*b).into_js(ctx),
            NativeArg::Int(i) => (*i).into_js(ctx),
            NativeArg::Double(d) => (*d).into_js(ctx),
            NativeArg::String(s) => s.as_str().into_js(ctx),
            NativeArg::Json(json) => ctx.json_parse(json.to_string()),
        };
        converted.map_err(|e| Fault::from_js(ctx, e))
    }
}

impl From<bool> for NativeArg {
    fn from(value: bool) -> Self {
        NativeArg::Bool(value)
    }
}

impl From<i32> for NativeArg {
    fn from(value: i32) -> Self {
        NativeArg::Int(value)
    }
}

impl From<f64> for NativeArg {
    fn from(value: f64) -> Self {
        NativeArg::Double(value)
    }
}

impl From<&str> for NativeArg {
    fn from(value: &str) -> Self {
        NativeArg::String(value.to_string())
    }
}

impl From<String> for NativeArg {
    fn from(value: String) -> Self {
        NativeArg::String(value)
    }
}

impl From<serde_json::Value> for NativeArg {
    fn from(value: serde_json::Value) -> Self {
        NativeArg::Json(value)
    }
}

/// Per-execution counter handed to the engine with each script run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceContext(pub u64);

impl SourceContext {
    /// The counter value for the next execution.
    pub fn next(self) -> Self {
        SourceContext(self.0.wrapping_add(1))
    }
}

impl fmt::Display for SourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
