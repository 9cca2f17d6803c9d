//! Editor facade over the scheduler and executor.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::executor::{Execution, ExecutionOutcome, OperationExecutor};
use crate::monitor::{MemoryProbe, MemoryWatch};
use crate::operation::{
    EditRequest, OperationError, OperationId, OperationListener, OperationPriority,
    OperationRecord, Reporter,
};
use crate::scheduler::{
    OperationScheduler, RunContext, RunOutcome, ScheduledOperation, SchedulerStatus,
};
use crate::transcoder::Transcoder;

/// Where an operation currently is.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    /// Waiting for a worker slot; `held` if paused.
    Pending { held: bool },
    /// Admitted, executor run not registered yet.
    Starting,
    /// Running; the record is a snapshot.
    Active(OperationRecord),
}

/// Submits edits and controls them while they are queued or running.
pub struct VideoEditor<T: Transcoder> {
    executor: OperationExecutor<T>,
    scheduler: OperationScheduler,
}

impl<T: Transcoder> Clone for VideoEditor<T> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T: Transcoder + 'static> VideoEditor<T> {
    /// Builds an editor from configuration.
    ///
    /// The memory probe feeds both the scheduler's pressure policy and the
    /// per-run monitors.
    pub fn new(config: &Config, transcoder: T, probe: Arc<dyn MemoryProbe>) -> Self {
        let watch = MemoryWatch::new(probe, config.memory.ceiling_ratio);
        let executor = OperationExecutor::with_memory(
            config.executor.clone(),
            transcoder,
            watch.clone(),
            config.memory.abort_grace(),
        );
        let scheduler = OperationScheduler::with_memory(
            config.scheduler.clone(),
            watch,
            config.memory.check_interval(),
        );
        Self::from_parts(executor, scheduler)
    }

    pub fn from_parts(executor: OperationExecutor<T>, scheduler: OperationScheduler) -> Self {
        Self {
            executor,
            scheduler,
        }
    }

    /// Starts the scheduler loops.
    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Validates and enqueues a request.
    ///
    /// Invalid requests fail here with `InvalidInput` and never reach the
    /// queue. The listener receives progress and exactly one terminal
    /// callback.
    pub fn submit(
        &self,
        request: EditRequest,
        priority: OperationPriority,
        listener: Arc<dyn OperationListener>,
    ) -> Result<OperationId, OperationError> {
        request.validate()?;

        let id = OperationId::new();
        let reporter = Reporter::new(id.clone(), listener);
        let executor = self.executor.clone();
        let run_reporter = reporter.clone();
        let kind = request.kind.name();

        let op = ScheduledOperation::new(id.clone(), priority, move |ctx: RunContext| {
            let executor = executor.clone();
            let execution = Execution {
                id: ctx.id.clone(),
                request: request.clone(),
                priority: ctx.priority,
                created_at: ctx.created_at,
                signal: ctx.signal(),
                reporter: run_reporter.clone(),
            };
            async move {
                match executor.execute(execution).await? {
                    ExecutionOutcome::Completed(_) => Ok(RunOutcome::Finished),
                    ExecutionOutcome::Requeued(_) => Ok(RunOutcome::Yielded),
                }
            }
        })
        .with_reporter(reporter);

        self.scheduler.enqueue(op)?;
        info!(%id, kind, %priority, "Operation submitted");
        Ok(id)
    }

    pub fn trim(
        &self,
        input: impl Into<PathBuf>,
        start_ms: u64,
        end_ms: u64,
        output: impl Into<PathBuf>,
        listener: Arc<dyn OperationListener>,
    ) -> Result<OperationId, OperationError> {
        self.submit(
            EditRequest::trim(input, start_ms, end_ms, output),
            OperationPriority::Normal,
            listener,
        )
    }

    pub fn rotate(
        &self,
        input: impl Into<PathBuf>,
        degrees: f32,
        output: impl Into<PathBuf>,
        listener: Arc<dyn OperationListener>,
    ) -> Result<OperationId, OperationError> {
        self.submit(
            EditRequest::rotate(input, degrees, output),
            OperationPriority::Normal,
            listener,
        )
    }

    pub fn merge(
        &self,
        inputs: Vec<PathBuf>,
        output: impl Into<PathBuf>,
        remove_audio: bool,
        listener: Arc<dyn OperationListener>,
    ) -> Result<OperationId, OperationError> {
        self.submit(
            EditRequest::merge(inputs, output).with_remove_audio(remove_audio),
            OperationPriority::Normal,
            listener,
        )
    }

    pub fn trim_and_rotate(
        &self,
        input: impl Into<PathBuf>,
        start_ms: u64,
        end_ms: u64,
        degrees: f32,
        output: impl Into<PathBuf>,
        listener: Arc<dyn OperationListener>,
    ) -> Result<OperationId, OperationError> {
        self.submit(
            EditRequest::trim_and_rotate(input, start_ms, end_ms, degrees, output),
            OperationPriority::Normal,
            listener,
        )
    }

    /// Cancels a pending or running operation. Idempotent.
    pub fn cancel(&self, id: &OperationId) -> bool {
        let found = self.scheduler.cancel(id) || self.executor.cancel(id);
        debug!(%id, found, "Cancel requested");
        found
    }

    /// Pauses an operation until [`resume`](Self::resume). A running
    /// operation restarts from scratch when resumed.
    pub fn pause(&self, id: &OperationId) -> bool {
        self.scheduler.pause(id)
    }

    pub fn resume(&self, id: &OperationId) -> bool {
        self.scheduler.resume(id)
    }

    /// Current status, or `None` once the operation is gone.
    pub fn status(&self, id: &OperationId) -> Option<OperationStatus> {
        if let Some(record) = self.executor.snapshot(id) {
            return Some(OperationStatus::Active(record));
        }
        if self.scheduler.is_pending(id) {
            return Some(OperationStatus::Pending {
                held: self.scheduler.is_held(id),
            });
        }
        if self.scheduler.is_active(id) {
            return Some(OperationStatus::Starting);
        }
        None
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    pub fn scheduler(&self) -> &OperationScheduler {
        &self.scheduler
    }

    pub fn executor(&self) -> &OperationExecutor<T> {
        &self.executor
    }

    /// Cancels everything, waits for running work, then removes every
    /// scratch file still on disk.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.executor.release().await;
    }
}
