//! Operation scheduler implementation.

use chrono::Utc;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::monitor::{MemorySample, MemoryWatch};
use crate::operation::{
    OperationError, OperationId, OperationPriority, Reporter, StopReason, StopSignal,
};

use super::config::SchedulerConfig;
use super::queue::{PendingEntry, PendingQueue};
use super::types::{RunContext, RunOutcome, ScheduledOperation, SchedulerStatus};

/// An admitted operation.
struct ActiveEntry {
    entry: PendingEntry,
    signal: StopSignal,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SchedulerState {
    pending: PendingQueue,
    active: HashMap<OperationId, ActiveEntry>,
    closed: bool,
    under_pressure: bool,
    next_seq: u64,
}

#[derive(Default)]
struct SchedulerStats {
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    requeued: AtomicU64,
}

struct SchedulerInner {
    config: SchedulerConfig,
    memory: Option<(MemoryWatch, Duration)>,
    state: Mutex<SchedulerState>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    stats: SchedulerStats,
    started: AtomicBool,
}

/// Bounded-concurrency priority scheduler.
///
/// Control calls (`enqueue`, `cancel`, `pause`, `resume`) are synchronous and
/// never wait on running work. Listener callbacks are always made after the
/// internal lock is released.
#[derive(Clone)]
pub struct OperationScheduler {
    inner: Arc<SchedulerInner>,
}

impl OperationScheduler {
    /// Creates a scheduler without memory-pressure handling.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::build(config, None)
    }

    /// Creates a scheduler that checks `memory` every `check_interval` and
    /// sheds low-priority work while it is over its ceiling.
    pub fn with_memory(
        config: SchedulerConfig,
        memory: MemoryWatch,
        check_interval: Duration,
    ) -> Self {
        Self::build(config, Some((memory, check_interval)))
    }

    fn build(config: SchedulerConfig, memory: Option<(MemoryWatch, Duration)>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                memory,
                state: Mutex::new(SchedulerState::default()),
                permits,
                shutdown: CancellationToken::new(),
                stats: SchedulerStats::default(),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Starts the admission loop and, if configured, the memory loop.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        info!(
            max_concurrent = self.inner.config.max_concurrent,
            "Starting operation scheduler"
        );

        self.spawn_admission_loop();
        if let Some((_, interval)) = &self.inner.memory {
            self.spawn_memory_loop(*interval);
        }
    }

    /// Adds an operation to the pending queue. Never blocks on running work.
    pub fn enqueue(&self, op: ScheduledOperation) -> Result<(), OperationError> {
        let mut state = self.lock();
        if state.closed {
            return Err(OperationError::scheduler_closed());
        }
        if state.pending.contains(&op.id) || state.active.contains_key(&op.id) {
            return Err(OperationError::duplicate(&op.id));
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        debug!(id = %op.id, priority = %op.priority, "Operation enqueued");
        state.pending.push(PendingEntry::new(op, Utc::now(), seq));
        publish_gauges(&state);
        Ok(())
    }

    /// Cancels a pending or active operation.
    ///
    /// A pending operation is dropped and its reporter receives
    /// `OperationCancelled`. An active one is signalled and reports when its
    /// run unwinds. Returns false for unknown or finished ids.
    pub fn cancel(&self, id: &OperationId) -> bool {
        let removed = {
            let mut state = self.lock();
            if let Some(entry) = state.pending.remove(id) {
                publish_gauges(&state);
                Some(entry)
            } else if let Some(active) = state.active.get(id) {
                if active.signal.stop(StopReason::Cancelled) {
                    info!(%id, "Cancelling active operation");
                }
                return true;
            } else {
                None
            }
        };

        match removed {
            Some(entry) => {
                info!(%id, "Cancelled pending operation");
                self.inner.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                report_failure(entry.op.reporter.as_ref(), &OperationError::cancelled());
                true
            }
            None => false,
        }
    }

    /// Pauses an operation.
    ///
    /// An active run is stopped and re-queued at the front of its priority
    /// class; a pending one stays where it is. Either way the entry is held
    /// until [`resume`](Self::resume).
    pub fn pause(&self, id: &OperationId) -> bool {
        let mut state = self.lock();
        if let Some(entry) = state.pending.get_mut(id) {
            entry.held = true;
            debug!(%id, "Holding pending operation");
            return true;
        }
        if let Some(active) = state.active.get(id) {
            if active.signal.stop(StopReason::Paused) {
                info!(%id, "Pausing active operation");
            }
            return true;
        }
        false
    }

    /// Releases a held pending entry. No-op for anything else.
    pub fn resume(&self, id: &OperationId) -> bool {
        let mut state = self.lock();
        match state.pending.get_mut(id) {
            Some(entry) if entry.held => {
                entry.held = false;
                info!(%id, "Resuming operation");
                true
            }
            _ => false,
        }
    }

    /// Samples memory once and applies the pressure policy.
    ///
    /// Returns the sample, or `None` without a memory watch.
    pub fn check_memory(&self) -> Option<MemorySample> {
        let (watch, _) = self.inner.memory.as_ref()?;
        let sample = watch.sample();
        self.apply_memory_policy(sample.exceeded());
        Some(sample)
    }

    /// Pauses active Low runs and stops admitting Low entries while
    /// `exceeded` holds. High and Normal work is never shed.
    pub fn apply_memory_policy(&self, exceeded: bool) {
        let mut state = self.lock();
        if exceeded {
            if !state.under_pressure {
                warn!("Memory above ceiling, shedding low-priority operations");
                metrics::MEMORY_PRESSURE_EVENTS.inc();
            }
            state.under_pressure = true;
            for (id, active) in state.active.iter() {
                if active.entry.op.priority == OperationPriority::Low
                    && active.signal.stop(StopReason::MemoryPressure)
                {
                    info!(%id, "Pausing low-priority operation under memory pressure");
                }
            }
        } else if state.under_pressure {
            info!("Memory pressure cleared");
            state.under_pressure = false;
        }
    }

    /// Admits as many eligible pending entries as there are free slots.
    ///
    /// Called by the admission loop every interval. Returns the number of
    /// operations started.
    pub fn admit_ready(&self) -> usize {
        let mut state = self.lock();
        if state.closed {
            return 0;
        }

        let mut admitted = 0;
        loop {
            let permit = match Arc::clone(&self.inner.permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let allow_low = !state.under_pressure;
            let Some(mut entry) = state.pending.pop_next(allow_low) else {
                break;
            };

            entry.attempts += 1;
            let id = entry.op.id.clone();
            let signal = StopSignal::new();
            let ctx = RunContext::new(
                id.clone(),
                entry.op.priority,
                entry.created_at,
                entry.attempts,
                signal.clone(),
            );
            let future = (entry.op.runnable)(ctx);

            info!(%id, priority = %entry.op.priority, attempt = entry.attempts, "Admitting operation");

            state.active.insert(
                id.clone(),
                ActiveEntry {
                    entry,
                    signal,
                    handle: None,
                },
            );

            // The worker cannot finish before its handle is stored: `finish`
            // takes the same lock.
            let handle = self.spawn_worker(id.clone(), future, permit);
            if let Some(active) = state.active.get_mut(&id) {
                active.handle = Some(handle);
            }
            admitted += 1;
        }

        publish_gauges(&state);
        admitted
    }

    /// Closes the scheduler, cancels all work and waits for active runs.
    ///
    /// Pending operations report `OperationCancelled` right away. Active
    /// runs are signalled and given `shutdown_grace_ms` to unwind before
    /// their tasks are aborted. Later enqueues fail with `SchedulerClosed`.
    pub async fn shutdown(&self) {
        let (drained, handles, aborts) = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;

            let drained = state.pending.drain();
            let mut handles = Vec::new();
            let mut aborts = Vec::new();
            for active in state.active.values_mut() {
                active.signal.stop(StopReason::Shutdown);
                if let Some(handle) = active.handle.take() {
                    aborts.push(handle.abort_handle());
                    handles.push(handle);
                }
            }
            publish_gauges(&state);
            (drained, handles, aborts)
        };

        info!(
            pending = drained.len(),
            active = handles.len(),
            "Shutting down operation scheduler"
        );
        self.inner.shutdown.cancel();

        for entry in drained {
            self.inner.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            report_failure(entry.op.reporter.as_ref(), &OperationError::cancelled());
        }

        let grace = self.inner.config.shutdown_grace();
        if tokio::time::timeout(grace, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Active operations did not stop in time, aborting"
            );
            abort_all(aborts);

            let stuck: Vec<ActiveEntry> = {
                let mut state = self.lock();
                let stuck = state.active.drain().map(|(_, a)| a).collect();
                publish_gauges(&state);
                stuck
            };
            for active in stuck {
                self.inner.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                report_failure(active.entry.op.reporter.as_ref(), &OperationError::cancelled());
            }
        }

        info!("Operation scheduler stopped");
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.lock();
        let stats = &self.inner.stats;
        SchedulerStatus {
            running: self.inner.started.load(Ordering::Relaxed) && !state.closed,
            closed: state.closed,
            max_concurrent: self.inner.config.max_concurrent,
            active: state.active.len(),
            pending: state.pending.len(),
            held: state.pending.held_count(),
            under_memory_pressure: state.under_pressure,
            total_completed: stats.completed.load(Ordering::Relaxed),
            total_failed: stats.failed.load(Ordering::Relaxed),
            total_cancelled: stats.cancelled.load(Ordering::Relaxed),
            total_requeued: stats.requeued.load(Ordering::Relaxed),
        }
    }

    /// Pending ids in admission order.
    pub fn pending_ids(&self) -> Vec<OperationId> {
        self.lock().pending.ids_in_order()
    }

    pub fn active_ids(&self) -> Vec<OperationId> {
        self.lock().active.keys().cloned().collect()
    }

    pub fn is_pending(&self, id: &OperationId) -> bool {
        self.lock().pending.contains(id)
    }

    pub fn is_held(&self, id: &OperationId) -> bool {
        self.lock().pending.get(id).is_some_and(|e| e.held)
    }

    pub fn is_active(&self, id: &OperationId) -> bool {
        self.lock().active.contains_key(id)
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_worker(
        &self,
        id: OperationId,
        future: futures::future::BoxFuture<'static, Result<RunOutcome, OperationError>>,
        permit: OwnedSemaphorePermit,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let result = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(%id, "Operation panicked: {}", message);
                    Err(OperationError::unknown(format!("Operation panicked: {}", message)))
                }
            };

            if let Some(inner) = weak.upgrade() {
                OperationScheduler { inner }.finish(&id, result);
            }
            drop(permit);
        })
    }

    /// Settles an admitted operation after its runnable returned.
    fn finish(&self, id: &OperationId, result: Result<RunOutcome, OperationError>) {
        let (report, error) = {
            let mut state = self.lock();
            let Some(active) = state.active.remove(id) else {
                return;
            };
            let reason = active.signal.reason();

            let requeue = match (&result, reason) {
                (Ok(RunOutcome::Yielded), None) => Some(None),
                (Ok(RunOutcome::Yielded), Some(r)) if r.requeues() => Some(Some(r)),
                (Err(e), Some(r)) if r.requeues() && e.is_cancelled() => Some(Some(r)),
                _ => None,
            };

            match requeue {
                Some(reason) if !state.closed => {
                    let mut entry = active.entry;
                    entry.requeued = true;
                    entry.held = reason == Some(StopReason::Paused);
                    info!(%id, held = entry.held, "Operation returned to queue");
                    self.inner.stats.requeued.fetch_add(1, Ordering::Relaxed);
                    state.pending.push(entry);
                    publish_gauges(&state);
                    return;
                }
                Some(_) => {
                    publish_gauges(&state);
                    (active.entry.op.reporter, Some(OperationError::cancelled()))
                }
                None => {
                    publish_gauges(&state);
                    let error = match result {
                        Ok(RunOutcome::Finished) => None,
                        Ok(RunOutcome::Yielded) => Some(OperationError::cancelled()),
                        Err(e) => Some(e),
                    };
                    (active.entry.op.reporter, error)
                }
            }
        };

        match error {
            None => {
                self.inner.stats.completed.fetch_add(1, Ordering::Relaxed);
                debug!(%id, "Operation finished");
            }
            Some(error) => {
                if error.is_cancelled() {
                    self.inner.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.inner.stats.failed.fetch_add(1, Ordering::Relaxed);
                }
                report_failure(report.as_ref(), &error);
            }
        }
    }

    fn spawn_admission_loop(&self) {
        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        let interval = self.inner.config.admission_interval();

        tokio::spawn(async move {
            info!("Admission loop started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Admission loop received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        OperationScheduler { inner }.admit_ready();
                    }
                }
            }
            info!("Admission loop stopped");
        });
    }

    fn spawn_memory_loop(&self, interval: Duration) {
        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();

        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Memory loop started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        OperationScheduler { inner }.check_memory();
                    }
                }
            }
            info!("Memory loop stopped");
        });
    }
}

fn publish_gauges(state: &SchedulerState) {
    metrics::SCHEDULER_ACTIVE.set(state.active.len() as i64);
    metrics::SCHEDULER_PENDING.set(state.pending.len() as i64);
}

fn report_failure(reporter: Option<&Reporter>, error: &OperationError) {
    if let Some(reporter) = reporter {
        reporter.failure(error);
    }
}

fn abort_all(handles: Vec<AbortHandle>) {
    for handle in handles {
        handle.abort();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
