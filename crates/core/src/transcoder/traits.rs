//! Trait definitions for the transcoder module.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::error::TranscoderError;
use super::progress::ProgressHolder;
use super::types::{TranscodeJob, TranscodeResult};

/// Renders compositions into output files.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Returns the name of this transcoder implementation.
    fn name(&self) -> &str;

    /// Runs one job to completion.
    ///
    /// Implementations publish progress into `progress` and must return
    /// [`TranscoderError::Cancelled`] promptly once `cancel` fires.
    async fn transcode(
        &self,
        job: TranscodeJob,
        progress: Arc<ProgressHolder>,
        cancel: CancellationToken,
    ) -> Result<TranscodeResult, TranscoderError>;

    /// Validates that the transcoder is properly configured and ready.
    async fn validate(&self) -> Result<(), TranscoderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcoder::{Composition, CompositionItem, ProgressState};
    use std::path::PathBuf;

    struct InstantTranscoder;

    #[async_trait]
    impl Transcoder for InstantTranscoder {
        fn name(&self) -> &str {
            "instant"
        }

        async fn transcode(
            &self,
            job: TranscodeJob,
            progress: Arc<ProgressHolder>,
            cancel: CancellationToken,
        ) -> Result<TranscodeResult, TranscoderError> {
            if cancel.is_cancelled() {
                return Err(TranscoderError::Cancelled);
            }
            progress.set_percent(100.0);
            Ok(TranscodeResult {
                job_id: job.job_id,
                output_path: job.output_path,
                output_size_bytes: 0,
                duration_ms: 0,
            })
        }
    }

    fn job() -> TranscodeJob {
        TranscodeJob {
            job_id: "test-job".to_string(),
            composition: Composition::single(CompositionItem::new("/in.mp4")),
            output_path: PathBuf::from("/out.mp4"),
        }
    }

    #[tokio::test]
    async fn test_transcode_reports_progress() {
        let progress = Arc::new(ProgressHolder::new());
        let result = InstantTranscoder
            .transcode(job(), progress.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.job_id, "test-job");
        assert_eq!(progress.get(), ProgressState::Percent(100.0));
        assert!(InstantTranscoder.validate().await.is_ok());
    }

    #[tokio::test]
    async fn test_transcode_honors_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = InstantTranscoder
            .transcode(job(), Arc::new(ProgressHolder::new()), cancel)
            .await;
        assert!(matches!(result, Err(TranscoderError::Cancelled)));
    }
}
