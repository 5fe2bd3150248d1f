//! `tether call` - load a script file, then call one of its functions.

use super::SharedOutput;
use crate::output::StyledOutput;
use anyhow::Context;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use termcolor::ColorChoice;
use tether_runtime::{ExecutorConfig, ScriptValue};

pub fn execute(
    config: ExecutorConfig,
    color: ColorChoice,
    file: &Path,
    function: &str,
    args: &[String],
) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("File not found: {}", file.display());
    }

    let output: SharedOutput = Arc::new(Mutex::new(StyledOutput::new(color)));
    let executor = super::start(config, &output)?;

    let result = call(&executor, file, function, args);
    if let Ok(value) = &result {
        output.lock().value(value);
    }
    super::finish(executor, &output)?;

    result.map(|_| ())
}

fn call(
    executor: &tether_runtime::Executor,
    file: &Path,
    function: &str,
    args: &[String],
) -> anyhow::Result<ScriptValue> {
    executor
        .run_script_file_async(file)
        .wait()
        .with_context(|| format!("failed to load {}", file.display()))?;

    let args: Vec<_> = args.iter().map(|raw| super::parse_arg(raw)).collect();
    tracing::debug!(function, ?args, "calling");
    executor
        .call_function_async(function, args)
        .wait()
        .with_context(|| format!("call to {} failed", function))
}
