pub mod call;
pub mod eval;
pub mod run;

use crate::output::StyledOutput;
use anyhow::Context;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tether_runtime::{Executor, ExecutorConfig, NativeArg};

pub type SharedOutput = Arc<Mutex<StyledOutput>>;

/// Load the executor configuration, or the defaults without `--config`.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ExecutorConfig> {
    match path {
        Some(path) => ExecutorConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(ExecutorConfig::default()),
    }
}

/// Start an executor whose messages and failures go to `output`.
pub fn start(config: ExecutorConfig, output: &SharedOutput) -> anyhow::Result<Executor> {
    let executor = Executor::with_config(config).context("failed to start executor")?;

    let messages = Arc::clone(output);
    executor.on_message(move |text| messages.lock().message(text))?;
    let failures = Arc::clone(output);
    executor.on_execution_failed(move |text| failures.lock().failure(text))?;

    Ok(executor)
}

/// Dispose the executor, surfacing a fault that stopped its loop.
pub fn finish(executor: Executor, output: &SharedOutput) -> anyhow::Result<()> {
    let result = executor.dispose().context("executor stopped with a fault");
    output.lock().flush();
    result
}

/// Command-line argument as a call argument: JSON when it parses, a plain
/// string otherwise.
pub fn parse_arg(raw: &str) -> NativeArg {
    serde_json::from_str(raw).unwrap_or_else(|_| NativeArg::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arg() {
        assert_eq!(parse_arg("42"), NativeArg::Int(42));
        assert_eq!(parse_arg("2.5"), NativeArg::Double(2.5));
        assert_eq!(parse_arg("true"), NativeArg::Bool(true));
        assert_eq!(parse_arg("hello"), NativeArg::String("hello".to_string()));
        assert_eq!(parse_arg("\"quoted\""), NativeArg::String("quoted".to_string()));
        assert!(matches!(parse_arg("{\"a\": [1, 2]}"), NativeArg::Json(_)));
    }

    #[test]
    fn test_load_config_defaults() {
        assert_eq!(load_config(None).unwrap(), ExecutorConfig::default());
        assert!(load_config(Some(Path::new("/definitely/not/here.toml"))).is_err());
    }
}
