//! Mock transcoder for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::transcoder::{
    ProgressHolder, TranscodeJob, TranscodeResult, Transcoder, TranscoderError,
};

/// Number of progress steps a simulated run is split into.
const STEPS: u32 = 10;

/// Mock implementation of the Transcoder trait.
///
/// Provides controllable behavior for testing:
/// - Track submitted jobs for assertions
/// - Simulate failure of the next job
/// - Control how long a job runs, with progress along the way
/// - Observe peak concurrency
///
/// Runs honor cancellation between steps and return
/// [`TranscoderError::Cancelled`].
#[derive(Debug, Clone)]
pub struct MockTranscoder {
    jobs: Arc<RwLock<Vec<TranscodeJob>>>,
    next_error: Arc<RwLock<Option<TranscoderError>>>,
    run_duration_ms: Arc<RwLock<u64>>,
    calls: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Default for MockTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTranscoder {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            run_duration_ms: Arc::new(RwLock::new(20)),
            calls: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Jobs in the order they were started.
    pub async fn recorded_jobs(&self) -> Vec<TranscodeJob> {
        self.jobs.read().await.clone()
    }

    /// Number of `transcode` calls so far, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of runs in flight right now.
    pub fn running_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous runs observed.
    pub fn max_concurrent_seen(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Configure the next job to fail with the given error.
    pub async fn set_next_error(&self, error: TranscoderError) {
        *self.next_error.write().await = Some(error);
    }

    /// Set the simulated run duration.
    pub async fn set_run_duration(&self, duration: Duration) {
        *self.run_duration_ms.write().await = duration.as_millis() as u64;
    }

    /// Waits until at least `n` jobs have started. Panics after 5 seconds.
    pub async fn wait_for_calls(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.call_count() < n {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {} transcode calls, saw {}",
                n,
                self.call_count()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn simulate(
        &self,
        job: &TranscodeJob,
        progress: &ProgressHolder,
        cancel: &CancellationToken,
    ) -> Result<TranscodeResult, TranscoderError> {
        let started = Instant::now();
        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        let step = Duration::from_millis(*self.run_duration_ms.read().await / STEPS as u64);
        for i in 1..=STEPS {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TranscoderError::Cancelled),
                _ = tokio::time::sleep(step) => {}
            }
            progress.set_percent((i * 100 / STEPS) as f32);
        }

        let bytes = format!("rendered {}", job.job_id);
        tokio::fs::write(&job.output_path, &bytes).await?;
        Ok(TranscodeResult {
            job_id: job.job_id.clone(),
            output_path: job.output_path.clone(),
            output_size_bytes: bytes.len() as u64,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Decrements the running count when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transcode(
        &self,
        job: TranscodeJob,
        progress: Arc<ProgressHolder>,
        cancel: CancellationToken,
    ) -> Result<TranscodeResult, TranscoderError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = RunningGuard(&self.running);
        self.peak.fetch_max(now, Ordering::SeqCst);

        self.jobs.write().await.push(job.clone());
        self.calls.fetch_add(1, Ordering::SeqCst);

        self.simulate(&job, &progress, &cancel).await
    }
}
