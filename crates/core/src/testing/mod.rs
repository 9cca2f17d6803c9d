//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the external seams
//! (transcoder, memory probe) and a listener that records every callback,
//! allowing scheduler and executor tests without ffmpeg.
//!
//! # Example
//!
//! ```rust,ignore
//! use clipq_core::testing::{MockTranscoder, MockMemoryProbe, RecordingListener};
//!
//! let transcoder = MockTranscoder::new();
//! transcoder.set_run_duration(Duration::from_millis(200)).await;
//!
//! let probe = Arc::new(MockMemoryProbe::new(1024));
//! probe.set_used(900);
//!
//! let listener = Arc::new(RecordingListener::new());
//! // Submit work, then inspect listener.successes() / listener.failures()
//! ```

mod mock_memory;
mod mock_transcoder;
mod recording_listener;

pub use mock_memory::MockMemoryProbe;
pub use mock_transcoder::MockTranscoder;
pub use recording_listener::RecordingListener;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::{Path, PathBuf};

    use crate::executor::ExecutorConfig;
    use crate::scheduler::SchedulerConfig;

    /// Executor config with scratch files under `<dir>/tmp` and a fast
    /// progress interval.
    pub fn executor_config(dir: &Path) -> ExecutorConfig {
        ExecutorConfig::default()
            .with_temp_dir(dir.join("tmp"))
            .with_progress_interval(10)
    }

    /// Scheduler config with fast admission and a short shutdown grace.
    pub fn scheduler_config(max_concurrent: usize) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_max_concurrent(max_concurrent)
            .with_admission_interval(10)
            .with_shutdown_grace(2000)
    }

    /// Writes a small placeholder input file and returns its path.
    pub fn create_input(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"not really a video").expect("write test input");
        path
    }
}
