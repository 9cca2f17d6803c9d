//! Types describing a transcode job.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A clip window within one source, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRange {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl ClipRange {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// One source in a composition with the effects applied to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionItem {
    pub source: PathBuf,
    pub clip: Option<ClipRange>,
    pub rotation_degrees: Option<f32>,
    pub remove_audio: bool,
}

impl CompositionItem {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            clip: None,
            rotation_degrees: None,
            remove_audio: false,
        }
    }

    pub fn with_clip(mut self, start_ms: u64, end_ms: u64) -> Self {
        self.clip = Some(ClipRange::new(start_ms, end_ms));
        self
    }

    pub fn with_rotation(mut self, degrees: f32) -> Self {
        self.rotation_degrees = Some(degrees);
        self
    }

    pub fn with_remove_audio(mut self, remove_audio: bool) -> Self {
        self.remove_audio = remove_audio;
        self
    }
}

/// Ordered list of items rendered back to back into one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub sequence: Vec<CompositionItem>,
}

impl Composition {
    pub fn single(item: CompositionItem) -> Self {
        Self {
            sequence: vec![item],
        }
    }

    pub fn sequence(items: Vec<CompositionItem>) -> Self {
        Self { sequence: items }
    }

    /// True if more than one item is concatenated.
    pub fn is_sequence(&self) -> bool {
        self.sequence.len() > 1
    }

    /// Output duration, when every item is clipped.
    pub fn known_duration_ms(&self) -> Option<u64> {
        self.sequence
            .iter()
            .map(|item| item.clip.map(|c| c.duration_ms()))
            .sum()
    }

    /// Whether the output carries an audio track.
    pub fn keeps_audio(&self) -> bool {
        self.sequence.iter().all(|item| !item.remove_audio)
    }
}

/// A transcode request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeJob {
    pub job_id: String,
    pub composition: Composition,
    pub output_path: PathBuf,
}

/// Result of a successful transcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeResult {
    pub job_id: String,
    pub output_path: PathBuf,
    pub output_size_bytes: u64,
    /// Wall-clock time spent transcoding.
    pub duration_ms: u64,
}

/// Subset of ffprobe output the transcoder uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub format: String,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}
