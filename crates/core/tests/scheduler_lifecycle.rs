//! Scheduler lifecycle integration tests.
//!
//! These tests drive the scheduler with hand-built runnables:
//! - Priority ordering and FIFO within a priority
//! - Concurrency bound
//! - Memory pressure shedding low-priority work
//! - Pause/resume of running work
//! - Shutdown and panics

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use clipq_core::{
    monitor::MemoryWatch,
    operation::{ErrorKind, OperationError, OperationId, OperationPriority, Reporter},
    scheduler::{OperationScheduler, RunOutcome, ScheduledOperation},
    testing::{fixtures, MockMemoryProbe, RecordingListener},
};

/// Test helper holding a scheduler and a shared start log.
struct TestHarness {
    scheduler: OperationScheduler,
    listener: Arc<RecordingListener>,
    started: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl TestHarness {
    fn new(max_concurrent: usize) -> Self {
        Self::with_scheduler(OperationScheduler::new(fixtures::scheduler_config(
            max_concurrent,
        )))
    }

    fn with_scheduler(scheduler: OperationScheduler) -> Self {
        Self {
            scheduler,
            listener: Arc::new(RecordingListener::new()),
            started: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueues an operation that runs for `duration` or until stopped.
    ///
    /// A stopped run yields, so requeue-worthy stops put it back in line.
    fn enqueue(&self, id: &str, priority: OperationPriority, duration: Duration) {
        let started = Arc::clone(&self.started);
        let running = Arc::clone(&self.running);
        let peak = Arc::clone(&self.peak);
        let name = id.to_string();

        let op = ScheduledOperation::new(OperationId::from(id), priority, move |ctx| {
            let started = Arc::clone(&started);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let name = name.clone();
            async move {
                started.lock().unwrap().push(name);
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                let outcome = tokio::select! {
                    _ = ctx.stopped() => Ok(RunOutcome::Yielded),
                    _ = tokio::time::sleep(duration) => Ok(RunOutcome::Finished),
                };
                running.fetch_sub(1, Ordering::SeqCst);
                outcome
            }
        })
        .with_reporter(Reporter::new(OperationId::from(id), self.listener.clone()));

        self.scheduler.enqueue(op).expect("enqueue");
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    async fn wait_for_started(&self, n: usize) {
        for _ in 0..400 {
            if self.started().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {} starts, saw {:?}", n, self.started());
    }

    async fn wait_for_idle(&self) {
        for _ in 0..400 {
            let status = self.scheduler.status();
            if status.active == 0 && status.pending == status.held {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("scheduler never went idle: {:?}", self.scheduler.status());
    }
}

#[tokio::test]
async fn test_higher_priority_starts_first() {
    let h = TestHarness::new(1);
    h.enqueue("low", OperationPriority::Low, Duration::from_millis(10));
    h.enqueue("normal", OperationPriority::Normal, Duration::from_millis(10));
    h.enqueue("high", OperationPriority::High, Duration::from_millis(10));

    h.scheduler.start();
    h.wait_for_started(3).await;
    h.wait_for_idle().await;

    assert_eq!(h.started(), vec!["high", "normal", "low"]);
    assert_eq!(h.scheduler.status().total_completed, 3);
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_same_priority_is_fifo() {
    let h = TestHarness::new(1);
    for id in ["first", "second", "third"] {
        h.enqueue(id, OperationPriority::Normal, Duration::from_millis(5));
    }
    assert_eq!(
        h.scheduler.pending_ids(),
        vec![
            OperationId::from("first"),
            OperationId::from("second"),
            OperationId::from("third")
        ]
    );

    h.scheduler.start();
    h.wait_for_started(3).await;
    assert_eq!(h.started(), vec!["first", "second", "third"]);
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    let h = TestHarness::new(3);
    for i in 0..8 {
        h.enqueue(&format!("op-{}", i), OperationPriority::Normal, Duration::from_millis(40));
    }

    h.scheduler.start();
    h.wait_for_started(8).await;
    h.wait_for_idle().await;

    assert_eq!(h.peak.load(Ordering::SeqCst), 3);
    assert_eq!(h.scheduler.status().total_completed, 8);
    assert_eq!(h.listener.terminal_count(), 0);
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_enqueue_never_blocks_on_running_work() {
    let h = TestHarness::new(1);
    h.scheduler.start();
    h.enqueue("long", OperationPriority::Normal, Duration::from_secs(10));
    h.wait_for_started(1).await;

    let before = std::time::Instant::now();
    h.enqueue("queued", OperationPriority::High, Duration::from_millis(1));
    assert!(before.elapsed() < Duration::from_millis(50));
    assert!(h.scheduler.is_pending(&OperationId::from("queued")));

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_memory_pressure_frees_slot_for_high_priority() {
    let probe = Arc::new(MockMemoryProbe::new(1000));
    let scheduler = OperationScheduler::with_memory(
        fixtures::scheduler_config(1),
        MemoryWatch::new(probe.clone(), 0.75),
        Duration::from_secs(3600),
    );
    let h = TestHarness::with_scheduler(scheduler);

    h.enqueue("low", OperationPriority::Low, Duration::from_secs(10));
    h.scheduler.start();
    h.wait_for_started(1).await;

    h.enqueue("high", OperationPriority::High, Duration::from_millis(10));
    probe.set_used(900);
    let sample = h.scheduler.check_memory().unwrap();
    assert!(sample.exceeded());

    h.wait_for_started(2).await;
    assert_eq!(h.started(), vec!["low", "high"]);
    assert!(h.scheduler.status().under_memory_pressure);

    // Low work waits until pressure clears, then resumes from the queue.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(h.scheduler.is_pending(&OperationId::from("low")));
    assert_eq!(h.started().len(), 2);

    probe.set_used(100);
    h.scheduler.check_memory();
    h.wait_for_started(3).await;
    assert_eq!(h.started()[2], "low");
    assert!(h.scheduler.status().total_requeued >= 1);
    assert_eq!(h.listener.terminal_count(), 0);

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_pause_and_resume_running_operation() {
    let h = TestHarness::new(2);
    let id = OperationId::from("paused");
    h.enqueue("paused", OperationPriority::Normal, Duration::from_secs(10));
    h.scheduler.start();
    h.wait_for_started(1).await;

    assert!(h.scheduler.pause(&id));
    for _ in 0..200 {
        if h.scheduler.is_held(&id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.scheduler.is_held(&id));
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(h.started().len(), 1);

    assert!(h.scheduler.resume(&id));
    h.wait_for_started(2).await;
    assert!(h.scheduler.is_active(&id));
    assert_eq!(h.listener.terminal_count(), 0);

    h.scheduler.shutdown().await;
    assert_eq!(h.listener.failures().len(), 1);
    assert_eq!(h.listener.failures()[0].1.kind, ErrorKind::OperationCancelled);
}

#[tokio::test]
async fn test_cancel_after_pause_is_terminal() {
    let h = TestHarness::new(1);
    let id = OperationId::from("paused-then-cancelled");
    h.enqueue("paused-then-cancelled", OperationPriority::Normal, Duration::from_secs(10));
    h.scheduler.start();
    h.wait_for_started(1).await;

    assert!(h.scheduler.pause(&id));
    assert!(h.scheduler.cancel(&id));
    h.listener.wait_for_terminal(1, Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let failures = h.listener.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1.kind, ErrorKind::OperationCancelled);
    assert!(!h.scheduler.is_pending(&id));
    assert!(!h.scheduler.is_active(&id));
    assert_eq!(h.scheduler.status().total_cancelled, 1);
    assert_eq!(h.started().len(), 1);
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_cancel_after_memory_pressure_is_terminal() {
    let h = TestHarness::new(1);
    let id = OperationId::from("shed");
    h.enqueue("shed", OperationPriority::Low, Duration::from_secs(10));
    h.scheduler.start();
    h.wait_for_started(1).await;

    h.scheduler.apply_memory_policy(true);
    assert!(h.scheduler.cancel(&id));
    h.scheduler.apply_memory_policy(false);
    h.listener.wait_for_terminal(1, Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.listener.failures()[0].1.kind, ErrorKind::OperationCancelled);
    assert!(!h.scheduler.is_pending(&id));
    assert_eq!(h.started().len(), 1);
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_cancels_active_and_pending() {
    let h = TestHarness::new(1);
    h.enqueue("active", OperationPriority::Normal, Duration::from_secs(10));
    h.enqueue("pending", OperationPriority::Normal, Duration::from_secs(10));
    h.scheduler.start();
    h.wait_for_started(1).await;

    h.scheduler.shutdown().await;

    let failures = h.listener.failures();
    assert_eq!(failures.len(), 2);
    assert!(failures
        .iter()
        .all(|(_, e)| e.kind == ErrorKind::OperationCancelled));
    let status = h.scheduler.status();
    assert!(status.closed);
    assert_eq!(status.active, 0);
    assert_eq!(status.pending, 0);

    let err = h
        .scheduler
        .enqueue(ScheduledOperation::new(
            OperationId::from("late"),
            OperationPriority::High,
            |_| async { Ok(RunOutcome::Finished) },
        ))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::SchedulerClosed);
}

#[tokio::test]
async fn test_panicking_operation_fails_without_killing_scheduler() {
    let h = TestHarness::new(1);
    let id = OperationId::from("boom");
    let op = ScheduledOperation::new(id.clone(), OperationPriority::High, |_| async {
        if true {
            panic!("decoder blew up");
        }
        Ok::<_, OperationError>(RunOutcome::Finished)
    })
    .with_reporter(Reporter::new(id.clone(), h.listener.clone()));
    h.scheduler.enqueue(op).unwrap();
    h.enqueue("after", OperationPriority::Normal, Duration::from_millis(5));

    h.scheduler.start();
    h.wait_for_started(1).await;
    h.wait_for_idle().await;

    let failures = h.listener.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, id);
    assert_eq!(failures[0].1.kind, ErrorKind::Unknown);
    assert!(failures[0].1.message.contains("decoder blew up"));
    assert_eq!(h.started(), vec!["after"]);
    assert_eq!(h.scheduler.status().total_failed, 1);

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_failed_run_reports_its_error() {
    let h = TestHarness::new(1);
    let id = OperationId::from("bad");
    let op = ScheduledOperation::new(id.clone(), OperationPriority::Normal, |_| async {
        Err(OperationError::io_failure("disk went away"))
    })
    .with_reporter(Reporter::new(id.clone(), h.listener.clone()));
    h.scheduler.enqueue(op).unwrap();

    h.scheduler.start();
    h.listener.wait_for_terminal(1, Duration::from_secs(2)).await;

    assert_eq!(h.listener.failures()[0].1.kind, ErrorKind::IoFailure);
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_cancel_running_operation() {
    let h = TestHarness::new(1);
    let gate = CancellationToken::new();
    let id = OperationId::from("cancel-me");
    let op = {
        let gate = gate.clone();
        ScheduledOperation::new(id.clone(), OperationPriority::Normal, move |ctx| {
            let gate = gate.clone();
            async move {
                gate.cancel();
                ctx.stopped().await;
                Err(OperationError::cancelled())
            }
        })
        .with_reporter(Reporter::new(id.clone(), h.listener.clone()))
    };
    h.scheduler.enqueue(op).unwrap();
    h.scheduler.start();
    tokio::time::timeout(Duration::from_secs(2), gate.cancelled())
        .await
        .unwrap();

    assert!(h.scheduler.cancel(&id));
    h.listener.wait_for_terminal(1, Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(h.listener.terminal_count(), 1);
    assert!(!h.scheduler.is_active(&id));
    assert!(!h.scheduler.is_pending(&id));
    h.scheduler.shutdown().await;
}
