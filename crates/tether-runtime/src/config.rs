//! Executor configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_engine::EngineOptions;

/// Errors loading an [`ExecutorConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings for one [`Executor`](crate::Executor).
///
/// ```toml
/// thread_name = "tether-worker"
/// min_interval_ms = 10
/// console = true
///
/// [engine]
/// memory_limit = 67108864
/// max_stack_size = 1048576
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Name of the worker thread
    pub thread_name: String,
    /// Engine resource limits
    pub engine: EngineOptions,
    /// Lower bound for `setInterval` delays, in milliseconds
    pub min_interval_ms: u64,
    /// Install the `console` object
    pub console: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_name: "tether-worker".to_string(),
            engine: EngineOptions::default(),
            min_interval_ms: 10,
            console: true,
        }
    }
}

impl ExecutorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}
