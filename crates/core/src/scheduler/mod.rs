//! Bounded-concurrency priority scheduler for edit operations.
//!
//! Operations wait in a pending queue ordered by priority, then re-queued
//! entries first, then submission time. An admission loop starts them on a
//! worker pool of `max_concurrent` slots. A memory loop pauses low-priority
//! work while the process is above its memory ceiling.

mod config;
mod queue;
mod runner;
mod types;

pub use config::SchedulerConfig;
pub use runner::OperationScheduler;
pub use types::{RunContext, RunOutcome, Runnable, ScheduledOperation, SchedulerStatus};
