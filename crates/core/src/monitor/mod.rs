//! Progress and memory sampling for running operations.

mod memory;
mod progress;

pub use memory::{MemoryProbe, MemorySample, MemoryWatch, SystemMemoryProbe};
pub use progress::{estimate_remaining, MonitorContext, MonitorHandle, ProgressMonitor};
