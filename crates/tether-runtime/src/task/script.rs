//! Script-run task body.

use tether_engine::{Engine, EngineResult, ScriptValue, SourceContext};

/// Evaluation of a script source.
#[derive(Debug, Clone)]
pub struct ScriptRun {
    source: String,
    path: Option<String>,
    source_context: SourceContext,
}

impl ScriptRun {
    pub fn new(source: impl Into<String>, path: Option<String>, source_context: SourceContext) -> Self {
        Self {
            source: source.into(),
            path,
            source_context,
        }
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Counter value the next execution will use.
    pub fn source_context(&self) -> SourceContext {
        self.source_context
    }

    pub(crate) fn execute(&mut self, engine: &Engine) -> EngineResult<ScriptValue> {
        let current = self.source_context;
        self.source_context = current.next();
        engine.run_script(&self.source, current, self.path.as_deref())
    }
}
