//! Types for the operation scheduler.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::operation::{OperationError, OperationId, OperationPriority, Reporter, StopSignal};

/// How a runnable ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The operation reached its terminal success.
    Finished,
    /// The operation stopped early and should go back to the queue.
    Yielded,
}

/// Work started by the scheduler. Called once per admission.
pub type Runnable =
    Arc<dyn Fn(RunContext) -> BoxFuture<'static, Result<RunOutcome, OperationError>> + Send + Sync>;

/// Per-admission context handed to a runnable.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub id: OperationId,
    pub priority: OperationPriority,
    /// Enqueue time, preserved across re-queues.
    pub created_at: DateTime<Utc>,
    /// 1 for the first admission, incremented on every re-queue.
    pub attempt: u32,
    signal: StopSignal,
}

impl RunContext {
    pub(crate) fn new(
        id: OperationId,
        priority: OperationPriority,
        created_at: DateTime<Utc>,
        attempt: u32,
        signal: StopSignal,
    ) -> Self {
        Self {
            id,
            priority,
            created_at,
            attempt,
            signal,
        }
    }

    /// Stop signal for this admission.
    pub fn signal(&self) -> StopSignal {
        self.signal.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.signal.is_stopped()
    }

    /// Resolves once the scheduler asks this run to stop.
    pub async fn stopped(&self) {
        self.signal.stopped().await
    }
}

/// An operation submitted to the scheduler.
pub struct ScheduledOperation {
    pub id: OperationId,
    pub priority: OperationPriority,
    pub runnable: Runnable,
    /// Receives the terminal failure when the scheduler ends the operation
    /// itself, e.g. a pending cancel or a panic.
    pub reporter: Option<Reporter>,
}

impl ScheduledOperation {
    pub fn new<F, Fut>(id: OperationId, priority: OperationPriority, run: F) -> Self
    where
        F: Fn(RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RunOutcome, OperationError>> + Send + 'static,
    {
        Self {
            id,
            priority,
            runnable: Arc::new(move |ctx| run(ctx).boxed()),
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = Some(reporter);
        self
    }
}

impl std::fmt::Debug for ScheduledOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledOperation")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("has_reporter", &self.reporter.is_some())
            .finish()
    }
}

/// Snapshot of scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Whether the admission loop is running.
    pub running: bool,
    /// Whether `shutdown` has been called.
    pub closed: bool,
    pub max_concurrent: usize,
    pub active: usize,
    pub pending: usize,
    /// Pending entries held by `pause`.
    pub held: usize,
    pub under_memory_pressure: bool,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    /// Times an active operation went back to the queue.
    pub total_requeued: u64,
}
