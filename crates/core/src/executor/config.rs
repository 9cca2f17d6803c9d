//! Configuration for the executor module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for [`OperationExecutor`](super::OperationExecutor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Directory for scratch files.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Progress sampling interval in milliseconds.
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    /// Extension of scratch files, which also selects the output container.
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("clipq")
}

fn default_progress_interval() -> u64 {
    300
}

fn default_output_extension() -> String {
    "mp4".to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            progress_interval_ms: default_progress_interval(),
            output_extension: default_output_extension(),
        }
    }
}

impl ExecutorConfig {
    /// Sets the temp directory.
    pub fn with_temp_dir(mut self, temp_dir: PathBuf) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    /// Sets the progress interval in milliseconds.
    pub fn with_progress_interval(mut self, interval_ms: u64) -> Self {
        self.progress_interval_ms = interval_ms;
        self
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
