//! Runs one edit operation through the transcoder.
//!
//! The executor maps an [`EditRequest`](crate::operation::EditRequest) to a
//! composition, owns the scratch file the transcoder writes into, samples
//! progress while the transcoder runs, and finally copies the result to its
//! destination. Every exit path releases the scratch file and stops the
//! monitor.

mod composition;
mod config;
mod runner;
mod temp;

pub use composition::build_composition;
pub use config::ExecutorConfig;
pub use runner::{Execution, ExecutionOutcome, OperationExecutor, OperationHandle};
pub use temp::TempResource;
