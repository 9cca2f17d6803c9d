//! Programmatic surface for submitting and controlling edits.
//!
//! [`VideoEditor`] ties the scheduler and executor together: it validates a
//! request, assigns the id both sides share, and enqueues a runnable that
//! drives the executor. [`OperationTracker`] keeps the latest view of each
//! operation for consumers that poll instead of listening.

mod facade;
mod tracker;

pub use facade::{OperationStatus, VideoEditor};
pub use tracker::{OperationTracker, OperationView};
