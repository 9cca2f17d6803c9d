//! Periodic progress sampler bound to one running operation.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::memory::MemoryWatch;
use crate::metrics;
use crate::operation::{
    OperationRecord, OperationState, ProgressUpdate, Reporter, StopReason, StopSignal,
};
use crate::transcoder::ProgressHolder;

/// Everything a monitor needs to sample one run.
pub struct MonitorContext {
    pub record: Arc<watch::Sender<OperationRecord>>,
    pub progress: Arc<ProgressHolder>,
    pub memory: Option<MemoryWatch>,
    pub reporter: Reporter,
    /// Stop signal of the run, fired when memory stays exhausted.
    pub signal: StopSignal,
    pub interval: Duration,
    /// Abort the run after memory stays above the ceiling this long.
    pub abort_grace: Option<Duration>,
}

/// Spawns monitors.
pub struct ProgressMonitor;

impl ProgressMonitor {
    /// Starts sampling on the current runtime.
    pub fn spawn(ctx: MonitorContext) -> MonitorHandle {
        let stop = CancellationToken::new();
        let task = tokio::spawn(run(ctx, stop.clone()));
        MonitorHandle {
            stop,
            task: Some(task),
        }
    }
}

/// Owner handle of a running monitor. Dropping it stops the monitor.
pub struct MonitorHandle {
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stops the monitor and waits for its last sample to finish.
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Progress monitor task failed: {}", e);
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Remaining time given elapsed time and completed fraction.
pub fn estimate_remaining(elapsed: Duration, fraction: f32) -> Option<Duration> {
    if fraction.is_nan() || fraction <= 0.0 {
        return None;
    }
    if fraction >= 1.0 {
        return Some(Duration::ZERO);
    }
    let total = elapsed.as_secs_f64() / fraction as f64;
    Some(Duration::from_secs_f64((total - elapsed.as_secs_f64()).max(0.0)))
}

async fn run(ctx: MonitorContext, stop: CancellationToken) {
    let id = ctx.record.borrow().id.clone();
    let started = Instant::now();
    let mut over_ceiling_since: Option<Instant> = None;

    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(%id, "Progress monitor started");

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ctx.signal.stopped() => break,
            _ = ticker.tick() => {}
        }

        if ctx.record.borrow().state != OperationState::Processing {
            break;
        }

        let sample = ctx.memory.as_ref().map(|m| m.sample());
        let used_bytes = sample.map(|s| s.used_bytes).unwrap_or(0);

        if let (Some(grace), Some(sample)) = (ctx.abort_grace, sample) {
            if sample.exceeded() {
                let since = *over_ceiling_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= grace {
                    warn!(
                        %id,
                        used_bytes = sample.used_bytes,
                        ceiling_bytes = sample.ceiling_bytes,
                        "Memory above ceiling past grace period, aborting run"
                    );
                    metrics::MEMORY_PRESSURE_EVENTS.inc();
                    ctx.signal.stop(StopReason::MemoryExhausted);
                    break;
                }
            } else {
                over_ceiling_since = None;
            }
        }

        let Some(fraction) = ctx.progress.get().fraction() else {
            continue;
        };

        let mut update = None;
        ctx.record.send_if_modified(|record| {
            if record.state != OperationState::Processing {
                return false;
            }
            record.set_progress(fraction);
            record.memory_usage_bytes = used_bytes;
            update = Some(ProgressUpdate {
                id: record.id.clone(),
                fraction: record.progress,
                stage: record.state,
                memory_usage_bytes: used_bytes,
                kind: record.kind.clone(),
                eta: estimate_remaining(started.elapsed(), record.progress),
            });
            true
        });

        match update {
            Some(update) => ctx.reporter.progress(&update),
            None => break,
        }
    }

    debug!(%id, "Progress monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationId, OperationKind, OperationPriority};
    use crate::testing::{MockMemoryProbe, RecordingListener};
    use chrono::Utc;

    fn processing_record() -> Arc<watch::Sender<OperationRecord>> {
        let mut record = OperationRecord::new(
            OperationId::from("mon-1"),
            OperationKind::Rotate { degrees: 90.0 },
            OperationPriority::Normal,
            Utc::now(),
        );
        record.advance(OperationState::Preparing);
        record.advance(OperationState::Processing);
        Arc::new(watch::channel(record).0)
    }

    fn context(
        record: Arc<watch::Sender<OperationRecord>>,
        progress: Arc<ProgressHolder>,
        listener: Arc<RecordingListener>,
    ) -> MonitorContext {
        MonitorContext {
            record,
            progress,
            memory: None,
            reporter: Reporter::new(OperationId::from("mon-1"), listener),
            signal: StopSignal::new(),
            interval: Duration::from_millis(10),
            abort_grace: None,
        }
    }

    #[test]
    fn test_estimate_remaining() {
        assert_eq!(estimate_remaining(Duration::from_secs(10), 0.0), None);
        assert_eq!(
            estimate_remaining(Duration::from_secs(10), 0.5),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            estimate_remaining(Duration::from_secs(10), 1.0),
            Some(Duration::ZERO)
        );
    }

    #[tokio::test]
    async fn test_skips_sentinel_progress() {
        let record = processing_record();
        let progress = Arc::new(ProgressHolder::new());
        let listener = Arc::new(RecordingListener::new());
        let handle =
            ProgressMonitor::spawn(context(record.clone(), progress.clone(), listener.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.progress_count(), 0);

        progress.set_unavailable();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.progress_count(), 0);

        progress.set_percent(40.0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;

        assert!(listener.progress_count() > 0);
        assert_eq!(record.borrow().progress, 0.4);
        assert!(listener.progress_values().iter().all(|f| *f == 0.4));
    }

    #[tokio::test]
    async fn test_stops_when_record_leaves_processing() {
        let record = processing_record();
        let progress = Arc::new(ProgressHolder::new());
        progress.set_percent(10.0);
        let listener = Arc::new(RecordingListener::new());
        let handle =
            ProgressMonitor::spawn(context(record.clone(), progress.clone(), listener.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        record.send_modify(|r| {
            r.advance(OperationState::Saving);
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        let seen = listener.progress_count();

        progress.set_percent(90.0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.progress_count(), seen);
        assert_eq!(record.borrow().progress, 0.1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_sustained_pressure_aborts_run() {
        let record = processing_record();
        let progress = Arc::new(ProgressHolder::new());
        let listener = Arc::new(RecordingListener::new());
        let probe = Arc::new(MockMemoryProbe::new(1000));
        probe.set_used(900);

        let mut ctx = context(record, progress, listener);
        ctx.memory = Some(MemoryWatch::new(probe, 0.75));
        ctx.abort_grace = Some(Duration::from_millis(30));
        let signal = ctx.signal.clone();

        let handle = ProgressMonitor::spawn(ctx);
        tokio::time::timeout(Duration::from_secs(2), signal.stopped())
            .await
            .expect("monitor should stop the run");
        assert_eq!(signal.reason(), Some(StopReason::MemoryExhausted));
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_drop_stops_monitor() {
        let record = processing_record();
        let progress = Arc::new(ProgressHolder::new());
        let listener = Arc::new(RecordingListener::new());
        let handle = ProgressMonitor::spawn(context(record, progress.clone(), listener.clone()));
        drop(handle);

        tokio::time::sleep(Duration::from_millis(20)).await;
        progress.set_percent(50.0);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(listener.progress_count(), 0);
    }
}
