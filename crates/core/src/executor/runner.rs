//! Operation executor implementation.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::monitor::{MemoryWatch, MonitorContext, ProgressMonitor};
use crate::operation::{
    EditRequest, OperationError, OperationId, OperationListener, OperationPriority,
    OperationRecord, OperationState, Reporter, StopReason, StopSignal,
};
use crate::transcoder::{ProgressHolder, TranscodeJob, Transcoder};

use super::composition::build_composition;
use super::config::ExecutorConfig;
use super::temp::{remove_quietly, TempResource};

/// How long `release` waits for stopped runs to unwind.
const RELEASE_WAIT: Duration = Duration::from_secs(5);

/// One run handed to the executor.
pub struct Execution {
    pub id: OperationId,
    pub request: EditRequest,
    pub priority: OperationPriority,
    /// Submission time, preserved across re-queues.
    pub created_at: DateTime<Utc>,
    pub signal: StopSignal,
    pub reporter: Reporter,
}

/// Non-error result of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Result saved to the given destination.
    Completed(PathBuf),
    /// Run was stopped for a reason that sends it back to the queue.
    Requeued(StopReason),
}

/// Handle to a run started with [`OperationExecutor::run`].
pub struct OperationHandle {
    id: OperationId,
    record: watch::Receiver<OperationRecord>,
    task: JoinHandle<Result<ExecutionOutcome, OperationError>>,
}

impl OperationHandle {
    pub fn id(&self) -> &OperationId {
        &self.id
    }

    /// Current state of the record.
    pub fn snapshot(&self) -> OperationRecord {
        self.record.borrow().clone()
    }

    /// Receiver notified on every record change.
    pub fn subscribe(&self) -> watch::Receiver<OperationRecord> {
        self.record.clone()
    }

    /// Waits for the run to finish and returns the final record.
    ///
    /// A run stopped for re-queue leaves the record in Idle; use
    /// [`join`](Self::join) to tell that apart from a terminal outcome.
    pub async fn wait(self) -> Result<OperationRecord, OperationError> {
        let outcome = self.task.await.map_err(task_failed)?;
        if let Ok(ExecutionOutcome::Requeued(reason)) = &outcome {
            debug!(id = %self.id, %reason, "Run ended for re-queue");
        }
        let record = self.record.borrow().clone();
        Ok(record)
    }

    /// Waits for the run and returns its outcome.
    pub async fn join(self) -> Result<ExecutionOutcome, OperationError> {
        self.task.await.map_err(task_failed)?
    }
}

fn task_failed(e: JoinError) -> OperationError {
    OperationError::unknown(format!("Operation task failed: {}", e))
}

/// Entry of the live table.
struct LiveOperation {
    record: watch::Receiver<OperationRecord>,
    signal: StopSignal,
}

/// Membership in the live table. Dropping it removes the entry, so a run
/// whose task is aborted mid-flight does not linger as active.
struct LiveGuard<T: Transcoder> {
    inner: Arc<ExecutorInner<T>>,
    id: OperationId,
}

impl<T: Transcoder> Drop for LiveGuard<T> {
    fn drop(&mut self) {
        self.inner
            .live
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

struct ExecutorInner<T: Transcoder> {
    config: ExecutorConfig,
    transcoder: Arc<T>,
    memory: Option<MemoryWatch>,
    abort_grace: Option<Duration>,
    live: RwLock<HashMap<OperationId, LiveOperation>>,
    released: AtomicBool,
}

/// Drives edit operations through a [`Transcoder`].
pub struct OperationExecutor<T: Transcoder> {
    inner: Arc<ExecutorInner<T>>,
}

impl<T: Transcoder> Clone for OperationExecutor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transcoder + 'static> OperationExecutor<T> {
    /// Creates a new executor.
    pub fn new(config: ExecutorConfig, transcoder: T) -> Self {
        Self::from_parts(config, Arc::new(transcoder), None, None)
    }

    /// Creates an executor that samples memory while operations run.
    ///
    /// With `abort_grace` set, a run whose process memory stays above the
    /// ceiling for that long is stopped with `InsufficientMemory`.
    pub fn with_memory(
        config: ExecutorConfig,
        transcoder: T,
        memory: MemoryWatch,
        abort_grace: Option<Duration>,
    ) -> Self {
        Self::from_parts(config, Arc::new(transcoder), Some(memory), abort_grace)
    }

    fn from_parts(
        config: ExecutorConfig,
        transcoder: Arc<T>,
        memory: Option<MemoryWatch>,
        abort_grace: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                config,
                transcoder,
                memory,
                abort_grace,
                live: RwLock::new(HashMap::new()),
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Validates `request`, then runs it on a spawned task.
    ///
    /// Invalid requests are rejected here and allocate nothing.
    pub fn run(
        &self,
        request: EditRequest,
        listener: Arc<dyn OperationListener>,
    ) -> Result<OperationHandle, OperationError> {
        request.validate()?;

        let id = OperationId::new();
        let execution = Execution {
            reporter: Reporter::new(id.clone(), listener),
            id: id.clone(),
            request,
            priority: OperationPriority::Normal,
            created_at: Utc::now(),
            signal: StopSignal::new(),
        };

        let (record, guard) = self.register(&execution)?;
        let receiver = record.subscribe();
        let executor = self.clone();
        let task =
            tokio::spawn(async move { executor.run_registered(execution, record, guard).await });

        Ok(OperationHandle {
            id,
            record: receiver,
            task,
        })
    }

    /// Runs one operation to a terminal state or a re-queue.
    ///
    /// Terminal outcomes are reported through the execution's reporter.
    /// A re-queue reports nothing and leaves the record back in Idle.
    pub async fn execute(&self, execution: Execution) -> Result<ExecutionOutcome, OperationError> {
        let (record, guard) = match self.register(&execution) {
            Ok(registered) => registered,
            Err(e) => {
                execution.reporter.failure(&e);
                return Err(e);
            }
        };
        self.run_registered(execution, record, guard).await
    }

    /// Requests cancellation of a live operation.
    ///
    /// Returns true if the operation was live. Repeated calls are no-ops.
    pub fn cancel(&self, id: &OperationId) -> bool {
        let live = self.inner.live.read().unwrap_or_else(PoisonError::into_inner);
        match live.get(id) {
            Some(op) => {
                if op.signal.stop(StopReason::Cancelled) {
                    info!(%id, "Cancelling operation");
                }
                true
            }
            None => false,
        }
    }

    /// Snapshot of a live operation's record.
    pub fn snapshot(&self, id: &OperationId) -> Option<OperationRecord> {
        let live = self.inner.live.read().unwrap_or_else(PoisonError::into_inner);
        live.get(id).map(|op| op.record.borrow().clone())
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn active_ids(&self) -> Vec<OperationId> {
        self.inner
            .live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Stops every live run and removes their scratch files.
    ///
    /// New runs are refused afterwards. Safe to call more than once.
    pub async fn release(&self) {
        if !self.inner.released.swap(true, Ordering::AcqRel) {
            info!("Releasing executor");
        }

        {
            let live = self.inner.live.read().unwrap_or_else(PoisonError::into_inner);
            for op in live.values() {
                op.signal.stop(StopReason::Shutdown);
            }
        }

        let deadline = Instant::now() + RELEASE_WAIT;
        while self.active_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Runs that did not unwind in time still own files on disk.
        let leftovers: Vec<PathBuf> = {
            let live = self.inner.live.read().unwrap_or_else(PoisonError::into_inner);
            let paths = live
                .values()
                .filter_map(|op| op.record.borrow().temp_resource.clone())
                .collect();
            paths
        };
        for path in leftovers {
            warn!(path = %path.display(), "Removing temp file of unfinished run");
            remove_quietly(&path).await;
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    fn register(
        &self,
        execution: &Execution,
    ) -> Result<(Arc<watch::Sender<OperationRecord>>, LiveGuard<T>), OperationError> {
        if self.is_released() {
            return Err(OperationError::scheduler_closed());
        }

        let record = OperationRecord::new(
            execution.id.clone(),
            execution.request.kind.clone(),
            execution.priority,
            execution.created_at,
        );
        let (tx, rx) = watch::channel(record);

        let mut live = self.inner.live.write().unwrap_or_else(PoisonError::into_inner);
        if live.contains_key(&execution.id) {
            return Err(OperationError::duplicate(&execution.id));
        }
        live.insert(
            execution.id.clone(),
            LiveOperation {
                record: rx,
                signal: execution.signal.clone(),
            },
        );
        let guard = LiveGuard {
            inner: Arc::clone(&self.inner),
            id: execution.id.clone(),
        };
        Ok((Arc::new(tx), guard))
    }

    async fn run_registered(
        &self,
        execution: Execution,
        record: Arc<watch::Sender<OperationRecord>>,
        guard: LiveGuard<T>,
    ) -> Result<ExecutionOutcome, OperationError> {
        let id = execution.id.clone();
        let kind = execution.request.kind.name();
        let started = Instant::now();

        info!(%id, kind, priority = %execution.priority, "Operation started");

        let result = self.drive(&execution, &record).await;

        match &result {
            Ok(ExecutionOutcome::Completed(output)) => {
                record.send_modify(|r| {
                    r.complete(output.clone());
                });
            }
            Ok(ExecutionOutcome::Requeued(reason)) => {
                record.send_modify(|r| {
                    r.reset();
                });
                metrics::OPERATIONS_PAUSED
                    .with_label_values(&[reason.as_str()])
                    .inc();
            }
            Err(e) => {
                record.send_modify(|r| {
                    r.fail(e.clone());
                });
            }
        }

        drop(guard);

        match &result {
            Ok(ExecutionOutcome::Completed(output)) => {
                info!(
                    %id,
                    kind,
                    output = %output.display(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Operation completed"
                );
                metrics::OPERATIONS_TOTAL
                    .with_label_values(&[kind, "completed"])
                    .inc();
                metrics::OPERATION_DURATION
                    .with_label_values(&[kind])
                    .observe(started.elapsed().as_secs_f64());
                execution.reporter.success(output);
            }
            Ok(ExecutionOutcome::Requeued(reason)) => {
                info!(%id, kind, %reason, "Operation stopped for re-queue");
            }
            Err(e) => {
                if e.is_cancelled() {
                    info!(%id, kind, "Operation cancelled");
                } else {
                    warn!(%id, kind, error = %e, "Operation failed");
                }
                metrics::OPERATIONS_TOTAL
                    .with_label_values(&[kind, e.kind.as_str()])
                    .inc();
                execution.reporter.failure(e);
            }
        }

        result
    }

    /// Preparing: composition and scratch file. The file is released on
    /// every path out of here.
    async fn drive(
        &self,
        execution: &Execution,
        record: &Arc<watch::Sender<OperationRecord>>,
    ) -> Result<ExecutionOutcome, OperationError> {
        if let Some(reason) = execution.signal.reason() {
            return stop_outcome(reason);
        }

        advance(record, OperationState::Preparing);
        let composition = build_composition(&execution.request)?;

        let temp = TempResource::create(
            &self.inner.config.temp_dir,
            execution.request.kind.temp_prefix(),
            &self.inner.config.output_extension,
        )
        .await
        .map_err(|e| OperationError::from_io("Failed to allocate temp file", &e))?;

        record.send_modify(|r| r.temp_resource = Some(temp.path().to_path_buf()));

        let job = TranscodeJob {
            job_id: execution.id.to_string(),
            composition,
            output_path: temp.path().to_path_buf(),
        };
        let outcome = self.process(execution, record, job).await;

        temp.release().await;
        record.send_modify(|r| r.temp_resource = None);
        outcome
    }

    /// Processing and Saving.
    async fn process(
        &self,
        execution: &Execution,
        record: &Arc<watch::Sender<OperationRecord>>,
        job: TranscodeJob,
    ) -> Result<ExecutionOutcome, OperationError> {
        if let Some(reason) = execution.signal.reason() {
            return stop_outcome(reason);
        }

        advance(record, OperationState::Processing);

        let progress = Arc::new(ProgressHolder::new());
        let monitor = ProgressMonitor::spawn(MonitorContext {
            record: Arc::clone(record),
            progress: Arc::clone(&progress),
            memory: self.inner.memory.clone(),
            reporter: execution.reporter.clone(),
            signal: execution.signal.clone(),
            interval: self.inner.config.progress_interval(),
            abort_grace: self.inner.abort_grace,
        });

        let temp_path = job.output_path.clone();
        let result = self
            .inner
            .transcoder
            .transcode(job, progress, execution.signal.token())
            .await;

        monitor.stop().await;

        if let Some(reason) = execution.signal.reason() {
            return stop_outcome(reason);
        }
        let transcoded = result?;
        debug!(
            id = %execution.id,
            bytes = transcoded.output_size_bytes,
            transcode_ms = transcoded.duration_ms,
            "Transcode finished"
        );

        advance(record, OperationState::Saving);
        save_result(&temp_path, &execution.request.output).await?;

        Ok(ExecutionOutcome::Completed(execution.request.output.clone()))
    }
}

fn advance(record: &watch::Sender<OperationRecord>, next: OperationState) {
    record.send_modify(|r| {
        let from = r.state;
        if r.advance(next) {
            debug!(id = %r.id, %from, to = %next, "State transition");
        }
    });
}

/// Outcome of a run that observed its stop signal.
fn stop_outcome(reason: StopReason) -> Result<ExecutionOutcome, OperationError> {
    match reason {
        StopReason::Paused | StopReason::MemoryPressure => Ok(ExecutionOutcome::Requeued(reason)),
        StopReason::MemoryExhausted => Err(OperationError::insufficient_memory(
            "Memory stayed above the ceiling while processing",
        )),
        StopReason::Cancelled | StopReason::Shutdown => Err(OperationError::cancelled()),
    }
}

/// Copies the scratch file to its destination and opens up its permissions.
async fn save_result(temp: &Path, output: &Path) -> Result<(), OperationError> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                OperationError::from_io(
                    &format!("Failed to create output directory {}", parent.display()),
                    &e,
                )
            })?;
        }
    }

    tokio::fs::copy(temp, output).await.map_err(|e| {
        OperationError::from_io(&format!("Failed to save result to {}", output.display()), &e)
    })?;

    grant_access(output).await
}

#[cfg(unix)]
async fn grant_access(path: &Path) -> Result<(), OperationError> {
    use std::os::unix::fs::PermissionsExt;

    let map = |e: std::io::Error| {
        OperationError::from_io(&format!("Failed to set permissions on {}", path.display()), &e)
    };
    let mut perms = tokio::fs::metadata(path).await.map_err(map)?.permissions();
    perms.set_mode(perms.mode() | 0o644);
    tokio::fs::set_permissions(path, perms).await.map_err(map)
}

#[cfg(not(unix))]
async fn grant_access(path: &Path) -> Result<(), OperationError> {
    let map = |e: std::io::Error| {
        OperationError::from_io(&format!("Failed to set permissions on {}", path.display()), &e)
    };
    let mut perms = tokio::fs::metadata(path).await.map_err(map)?.permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    tokio::fs::set_permissions(path, perms).await.map_err(map)
}
