use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use crate::executor::ExecutorConfig;
pub use crate::scheduler::SchedulerConfig;
pub use crate::transcoder::TranscoderConfig;

/// Root configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Memory ceiling and pressure handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Fraction of `max_bytes` above which memory counts as exhausted.
    #[serde(default = "default_ceiling_ratio")]
    pub ceiling_ratio: f64,

    /// Declared memory maximum. Defaults to total system memory.
    #[serde(default)]
    pub max_bytes: Option<u64>,

    /// Memory check interval in milliseconds.
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,

    /// Abort a run whose memory stays above the ceiling this long.
    /// Disabled when unset.
    #[serde(default)]
    pub abort_grace_ms: Option<u64>,
}

fn default_ceiling_ratio() -> f64 {
    0.75
}

fn default_check_interval() -> u64 {
    1000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ceiling_ratio: default_ceiling_ratio(),
            max_bytes: None,
            check_interval_ms: default_check_interval(),
            abort_grace_ms: None,
        }
    }
}

impl MemoryConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn abort_grace(&self) -> Option<Duration> {
        self.abort_grace_ms.map(Duration::from_millis)
    }
}

/// Where results land when a request names no destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}
