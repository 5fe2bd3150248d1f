//! `tether run` - run a script file, then keep the loop alive for timers.

use super::SharedOutput;
use crate::output::StyledOutput;
use anyhow::Context;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use termcolor::ColorChoice;
use tether_runtime::ExecutorConfig;

pub fn execute(
    config: ExecutorConfig,
    color: ColorChoice,
    file: &Path,
    wait_ms: u64,
) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("File not found: {}", file.display());
    }

    let output: SharedOutput = Arc::new(Mutex::new(StyledOutput::new(color)));
    let executor = super::start(config, &output)?;

    let result = executor
        .run_script_file_async(file)
        .wait()
        .with_context(|| format!("failed to run {}", file.display()));

    if result.is_ok() && wait_ms > 0 {
        tracing::debug!(wait_ms, "waiting for timers");
        std::thread::sleep(Duration::from_millis(wait_ms));
    }
    super::finish(executor, &output)?;

    result.map(|_| ())
}
