//! Configuration for the scheduler module.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`OperationScheduler`](super::OperationScheduler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum operations running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Admission loop interval in milliseconds.
    #[serde(default = "default_admission_interval")]
    pub admission_interval_ms: u64,

    /// How long shutdown waits for active operations, in milliseconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_admission_interval() -> u64 {
    100
}

fn default_shutdown_grace() -> u64 {
    5000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            admission_interval_ms: default_admission_interval(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

impl SchedulerConfig {
    /// Sets the maximum concurrent operations.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the admission interval in milliseconds.
    pub fn with_admission_interval(mut self, interval_ms: u64) -> Self {
        self.admission_interval_ms = interval_ms;
        self
    }

    /// Sets the shutdown grace period in milliseconds.
    pub fn with_shutdown_grace(mut self, grace_ms: u64) -> Self {
        self.shutdown_grace_ms = grace_ms;
        self
    }

    pub fn admission_interval(&self) -> Duration {
        Duration::from_millis(self.admission_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
