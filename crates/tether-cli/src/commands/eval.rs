//! `tether eval` - evaluate inline code and print the result.

use super::SharedOutput;
use crate::output::StyledOutput;
use parking_lot::Mutex;
use std::sync::Arc;
use termcolor::ColorChoice;
use tether_runtime::ExecutorConfig;

pub fn execute(config: ExecutorConfig, color: ColorChoice, code: &str) -> anyhow::Result<()> {
    let output: SharedOutput = Arc::new(Mutex::new(StyledOutput::new(color)));
    let executor = super::start(config, &output)?;

    let result = executor.run_script_with_path_async(code, "<eval>").wait();
    if let Ok(value) = &result {
        output.lock().value(value);
    }
    super::finish(executor, &output)?;

    result?;
    Ok(())
}
