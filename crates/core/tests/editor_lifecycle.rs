//! Editor lifecycle integration tests.
//!
//! These tests verify the editor facade with a mock transcoder:
//! - Submission, validation and success callbacks
//! - Scheduling bound across many submissions
//! - Cancellation of pending and running operations
//! - Error mapping from the transcoder
//! - Shutdown

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use clipq_core::{
    editor::{OperationStatus, OperationTracker, VideoEditor},
    executor::OperationExecutor,
    operation::{
        ChannelListener, EditRequest, ErrorKind, OperationEvent, OperationPriority,
        OperationState,
    },
    scheduler::OperationScheduler,
    testing::{fixtures, MockTranscoder, RecordingListener},
    transcoder::{ProgressHolder, TranscodeJob, TranscodeResult, Transcoder, TranscoderError},
};

/// Transcoder that never looks at its cancellation token.
struct StubbornTranscoder;

#[async_trait]
impl Transcoder for StubbornTranscoder {
    fn name(&self) -> &str {
        "stubborn"
    }

    async fn transcode(
        &self,
        _job: TranscodeJob,
        progress: Arc<ProgressHolder>,
        _cancel: CancellationToken,
    ) -> Result<TranscodeResult, TranscoderError> {
        progress.set_percent(10.0);
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(TranscoderError::failed("should have been aborted"))
    }
}

/// Test helper to create an editor with mocks.
struct TestHarness {
    editor: VideoEditor<MockTranscoder>,
    transcoder: MockTranscoder,
    listener: Arc<RecordingListener>,
    dir: TempDir,
}

impl TestHarness {
    async fn new(max_concurrent: usize) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let transcoder = MockTranscoder::new();
        transcoder.set_run_duration(Duration::from_millis(30)).await;

        let executor =
            OperationExecutor::new(fixtures::executor_config(dir.path()), transcoder.clone());
        let scheduler = OperationScheduler::new(fixtures::scheduler_config(max_concurrent));
        let editor = VideoEditor::from_parts(executor, scheduler);
        editor.start();

        Self {
            editor,
            transcoder,
            listener: Arc::new(RecordingListener::new()),
            dir,
        }
    }

    fn input(&self, name: &str) -> PathBuf {
        fixtures::create_input(self.dir.path(), name)
    }

    fn output(&self, name: &str) -> PathBuf {
        self.dir.path().join("out").join(name)
    }

    fn temp_files(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("tmp"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

#[tokio::test]
async fn test_trim_succeeds_with_single_callback() {
    let h = TestHarness::new(3).await;
    let input = h.input("clip.mp4");
    let output = h.output("trimmed.mp4");

    let id = h
        .editor
        .trim(&input, 1000, 3000, &output, h.listener.clone())
        .unwrap();
    h.listener.wait_for_terminal(1, Duration::from_secs(5)).await;

    assert_eq!(h.listener.successes(), vec![(id.clone(), output.clone())]);
    assert!(h.listener.failures().is_empty());
    assert!(output.exists());
    assert_eq!(h.temp_files(), 0);

    let jobs = h.transcoder.recorded_jobs().await;
    assert_eq!(jobs.len(), 1);
    let item = &jobs[0].composition.sequence[0];
    assert_eq!(item.source, input);
    assert_eq!(item.clip.as_ref().map(|c| (c.start_ms, c.end_ms)), Some((1000, 3000)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.editor.status(&id), None);
    assert_eq!(h.listener.terminal_count(), 1);
    h.editor.shutdown().await;
}

#[tokio::test]
async fn test_invalid_requests_fail_synchronously() {
    let h = TestHarness::new(3).await;
    let input = h.input("clip.mp4");

    let err = h
        .editor
        .trim(&input, 5000, 1000, h.output("a.mp4"), h.listener.clone())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
    assert!(err.message.contains("End time must be greater than start time"));

    let err = h
        .editor
        .merge(vec![input.clone()], h.output("b.mp4"), false, h.listener.clone())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
    assert!(err.message.contains("At least two videos required for merging"));

    assert_eq!(h.editor.scheduler_status().pending, 0);
    assert_eq!(h.transcoder.call_count(), 0);
    assert_eq!(h.listener.terminal_count(), 0);
    h.editor.shutdown().await;
}

#[tokio::test]
async fn test_five_trims_respect_concurrency_limit() {
    let h = TestHarness::new(3).await;
    h.transcoder.set_run_duration(Duration::from_millis(150)).await;
    let input = h.input("clip.mp4");

    let mut ids = Vec::new();
    for i in 0..5 {
        let id = h
            .editor
            .trim(&input, 0, 1000, h.output(&format!("out-{}.mp4", i)), h.listener.clone())
            .unwrap();
        ids.push(id);
    }
    h.listener.wait_for_terminal(5, Duration::from_secs(10)).await;

    assert_eq!(h.listener.successes().len(), 5);
    assert_eq!(h.transcoder.max_concurrent_seen(), 3);
    for id in &ids {
        assert_eq!(h.listener.terminal_events_for(id).len(), 1);
    }
    assert_eq!(h.temp_files(), 0);
    h.editor.shutdown().await;
}

#[tokio::test]
async fn test_merge_builds_sequence() {
    let h = TestHarness::new(1).await;
    let inputs = vec![h.input("a.mp4"), h.input("b.mp4"), h.input("c.mp4")];

    h.editor
        .merge(inputs.clone(), h.output("merged.mp4"), true, h.listener.clone())
        .unwrap();
    h.listener.wait_for_terminal(1, Duration::from_secs(5)).await;

    let jobs = h.transcoder.recorded_jobs().await;
    let sources: Vec<&Path> = jobs[0]
        .composition
        .sequence
        .iter()
        .map(|item| item.source.as_path())
        .collect();
    assert_eq!(sources, inputs.iter().map(PathBuf::as_path).collect::<Vec<_>>());
    assert!(!jobs[0].composition.keeps_audio());
    assert!(jobs[0]
        .output_path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("merge_"));
    h.editor.shutdown().await;
}

#[tokio::test]
async fn test_cancel_pending_never_reaches_transcoder() {
    let h = TestHarness::new(1).await;
    h.transcoder.set_run_duration(Duration::from_secs(5)).await;
    let input = h.input("clip.mp4");

    let running = h
        .editor
        .rotate(&input, 90.0, h.output("r1.mp4"), h.listener.clone())
        .unwrap();
    h.transcoder.wait_for_calls(1).await;
    let queued = h
        .editor
        .rotate(&input, 90.0, h.output("r2.mp4"), h.listener.clone())
        .unwrap();
    assert_eq!(
        h.editor.status(&queued),
        Some(OperationStatus::Pending { held: false })
    );

    assert!(h.editor.cancel(&queued));
    let failures = h.listener.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, queued);
    assert_eq!(failures[0].1.kind, ErrorKind::OperationCancelled);

    assert!(h.editor.cancel(&running));
    h.listener.wait_for_terminal(2, Duration::from_secs(5)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.transcoder.call_count(), 1);
    assert_eq!(h.listener.terminal_count(), 2);
    assert!(!h.editor.cancel(&queued));
    assert_eq!(h.temp_files(), 0);
    h.editor.shutdown().await;
}

#[tokio::test]
async fn test_running_status_and_single_cancel_callback() {
    let h = TestHarness::new(2).await;
    h.transcoder.set_run_duration(Duration::from_secs(5)).await;
    let input = h.input("clip.mp4");

    let id = h
        .editor
        .trim_and_rotate(&input, 0, 4000, 270.0, h.output("tr.mp4"), h.listener.clone())
        .unwrap();
    h.transcoder.wait_for_calls(1).await;

    match h.editor.status(&id) {
        Some(OperationStatus::Active(record)) => {
            assert_eq!(record.state, OperationState::Processing);
            assert!(record.temp_resource.is_some());
        }
        other => panic!("expected active status, got {:?}", other),
    }

    assert!(h.editor.cancel(&id));
    assert!(h.editor.cancel(&id));
    h.listener.wait_for_terminal(1, Duration::from_secs(5)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events = h.listener.terminal_events_for(&id);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        OperationEvent::Failed { error, .. } if error.kind == ErrorKind::OperationCancelled
    ));
    assert_eq!(h.temp_files(), 0);
    h.editor.shutdown().await;
}

#[tokio::test]
async fn test_transcoder_failures_are_mapped() {
    let h = TestHarness::new(1).await;
    let input = h.input("clip.mp4");

    let cases = [
        (
            TranscoderError::InsufficientStorage {
                reason: "no space left on device".to_string(),
            },
            ErrorKind::InsufficientStorage,
        ),
        (
            TranscoderError::DecodingFailed {
                reason: "invalid data found".to_string(),
            },
            ErrorKind::CodecFailure,
        ),
        (
            TranscoderError::encoding_failed("x264 gave up", None),
            ErrorKind::CodecFailure,
        ),
    ];

    for (i, (error, expected)) in cases.into_iter().enumerate() {
        let listener = Arc::new(RecordingListener::new());
        h.transcoder.set_next_error(error).await;
        h.editor
            .rotate(&input, 90.0, h.output(&format!("e{}.mp4", i)), listener.clone())
            .unwrap();
        listener.wait_for_terminal(1, Duration::from_secs(5)).await;
        assert_eq!(listener.failures()[0].1.kind, expected);
    }
    assert_eq!(h.temp_files(), 0);
    h.editor.shutdown().await;
}

#[tokio::test]
async fn test_pause_restarts_running_operation() {
    let h = TestHarness::new(1).await;
    h.transcoder.set_run_duration(Duration::from_millis(300)).await;
    let input = h.input("clip.mp4");

    let id = h
        .editor
        .submit(
            EditRequest::rotate(&input, 90.0, h.output("p.mp4")),
            OperationPriority::Low,
            h.listener.clone(),
        )
        .unwrap();
    h.transcoder.wait_for_calls(1).await;

    assert!(h.editor.pause(&id));
    for _ in 0..200 {
        if h.editor.status(&id) == Some(OperationStatus::Pending { held: true }) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        h.editor.status(&id),
        Some(OperationStatus::Pending { held: true })
    );
    assert_eq!(h.listener.terminal_count(), 0);
    assert_eq!(h.temp_files(), 0);

    assert!(h.editor.resume(&id));
    h.listener.wait_for_terminal(1, Duration::from_secs(5)).await;
    assert_eq!(h.transcoder.call_count(), 2);
    assert_eq!(h.listener.successes().len(), 1);
    h.editor.shutdown().await;
}

#[tokio::test]
async fn test_cancel_right_after_pause_ends_operation() {
    let h = TestHarness::new(1).await;
    h.transcoder.set_run_duration(Duration::from_secs(5)).await;
    let input = h.input("clip.mp4");

    let id = h
        .editor
        .rotate(&input, 90.0, h.output("pc.mp4"), h.listener.clone())
        .unwrap();
    h.transcoder.wait_for_calls(1).await;

    assert!(h.editor.pause(&id));
    assert!(h.editor.cancel(&id));
    h.listener.wait_for_terminal(1, Duration::from_secs(5)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events = h.listener.terminal_events_for(&id);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        OperationEvent::Failed { error, .. } if error.kind == ErrorKind::OperationCancelled
    ));
    assert_eq!(h.editor.status(&id), None);
    assert_eq!(h.editor.scheduler_status().total_cancelled, 1);
    assert_eq!(h.transcoder.call_count(), 1);
    assert_eq!(h.temp_files(), 0);
    h.editor.shutdown().await;
}

#[tokio::test]
async fn test_channel_and_tracker_listeners() {
    let h = TestHarness::new(2).await;
    h.transcoder.set_run_duration(Duration::from_millis(100)).await;
    let input = h.input("clip.mp4");

    let (listener, mut events) = ChannelListener::new(64);
    let id = h
        .editor
        .rotate(&input, 180.0, h.output("c.mp4"), Arc::new(listener))
        .unwrap();

    let mut last_fraction = 0.0f32;
    let terminal = loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            OperationEvent::Progress(update) => {
                assert_eq!(update.id, id);
                assert!(update.fraction >= last_fraction);
                last_fraction = update.fraction;
            }
            other => break other,
        }
    };
    assert!(matches!(terminal, OperationEvent::Succeeded { .. }));

    let tracker = Arc::new(OperationTracker::new());
    let tracked = h
        .editor
        .trim(&input, 0, 500, h.output("t.mp4"), tracker.clone())
        .unwrap();
    for _ in 0..400 {
        if tracker.view(&tracked).is_some_and(|v| v.is_finished()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let view = tracker.view(&tracked).unwrap();
    assert_eq!(view.stage, Some(OperationState::Completed));
    assert_eq!(view.output, Some(h.output("t.mp4")));
    h.editor.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_cancels_everything_and_closes() {
    let h = TestHarness::new(1).await;
    h.transcoder.set_run_duration(Duration::from_secs(5)).await;
    let input = h.input("clip.mp4");

    h.editor
        .rotate(&input, 90.0, h.output("a.mp4"), h.listener.clone())
        .unwrap();
    h.editor
        .rotate(&input, 90.0, h.output("b.mp4"), h.listener.clone())
        .unwrap();
    h.transcoder.wait_for_calls(1).await;

    h.editor.shutdown().await;

    assert_eq!(h.listener.terminal_count(), 2);
    assert!(h
        .listener
        .failures()
        .iter()
        .all(|(_, e)| e.kind == ErrorKind::OperationCancelled));
    assert_eq!(h.temp_files(), 0);

    let err = h
        .editor
        .rotate(&input, 90.0, h.output("c.mp4"), h.listener.clone())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::SchedulerClosed);
}

#[tokio::test]
async fn test_shutdown_aborts_runs_that_ignore_cancel() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let executor =
        OperationExecutor::new(fixtures::executor_config(dir.path()), StubbornTranscoder);
    let scheduler =
        OperationScheduler::new(fixtures::scheduler_config(1).with_shutdown_grace(50));
    let editor = VideoEditor::from_parts(executor, scheduler);
    editor.start();

    let listener = Arc::new(RecordingListener::new());
    let input = fixtures::create_input(dir.path(), "clip.mp4");
    let id = editor
        .rotate(&input, 90.0, dir.path().join("out.mp4"), listener.clone())
        .unwrap();
    for _ in 0..400 {
        if editor.executor().active_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(matches!(editor.status(&id), Some(OperationStatus::Active(_))));

    let started = Instant::now();
    editor.shutdown().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(editor.executor().active_count(), 0);
    assert_eq!(editor.status(&id), None);
    let failures = listener.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1.kind, ErrorKind::OperationCancelled);
    let leftovers = std::fs::read_dir(dir.path().join("tmp"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}
