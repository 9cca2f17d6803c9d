//! Transcoder abstraction used to render edit compositions.
//!
//! The scheduling core treats the transcoder as a black box: given a
//! [`Composition`] and an output path it produces a file, publishes progress
//! through a shared [`ProgressHolder`], and stops at its next checkpoint when
//! the cancellation token fires.
//!
//! # Example
//!
//! ```ignore
//! use clipq_core::transcoder::{FfmpegTranscoder, Transcoder, TranscodeJob, Composition};
//!
//! let transcoder = FfmpegTranscoder::with_defaults();
//! transcoder.validate().await?;
//!
//! let progress = Arc::new(ProgressHolder::new());
//! let job = TranscodeJob {
//!     job_id: "job-1".to_string(),
//!     composition: Composition::single(CompositionItem::new("/videos/in.mp4")),
//!     output_path: PathBuf::from("/tmp/out.mp4"),
//! };
//! let result = transcoder.transcode(job, progress, CancellationToken::new()).await?;
//! ```

mod config;
mod error;
mod ffmpeg;
mod progress;
mod traits;
mod types;

pub use config::TranscoderConfig;
pub use error::TranscoderError;
pub use ffmpeg::FfmpegTranscoder;
pub use progress::{ProgressHolder, ProgressState};
pub use traits::Transcoder;
pub use types::{ClipRange, Composition, CompositionItem, MediaInfo, TranscodeJob, TranscodeResult};
