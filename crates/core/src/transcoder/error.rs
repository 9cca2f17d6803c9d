//! Error types for the transcoder module.

use std::path::PathBuf;
use thiserror::Error;

use crate::operation::{ErrorKind, OperationError};

/// Errors that can occur while transcoding.
#[derive(Debug, Error)]
pub enum TranscoderError {
    /// FFmpeg binary not found.
    #[error("FFmpeg not found at path: {path}")]
    FfmpegNotFound { path: PathBuf },

    /// FFprobe binary not found.
    #[error("FFprobe not found at path: {path}")]
    FfprobeNotFound { path: PathBuf },

    /// Input file not found.
    #[error("Input file not found: {path}")]
    InputNotFound { path: PathBuf },

    /// The composition cannot be rendered.
    #[error("Invalid composition: {reason}")]
    InvalidComposition { reason: String },

    /// Encoder failed.
    #[error("Encoding failed: {reason}")]
    EncodingFailed {
        reason: String,
        stderr: Option<String>,
    },

    /// Decoder could not read an input.
    #[error("Decoding failed: {reason}")]
    DecodingFailed { reason: String },

    /// Output device is full.
    #[error("Insufficient storage: {reason}")]
    InsufficientStorage { reason: String },

    /// Transcoder ran out of memory.
    #[error("Insufficient memory: {reason}")]
    InsufficientMemory { reason: String },

    /// Failed to probe a media file.
    #[error("Failed to probe media file: {reason}")]
    ProbeFailed { reason: String },

    /// Any other transcoder failure.
    #[error("Transcode failed: {reason}")]
    Failed { reason: String },

    /// I/O error during transcoding.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Job was cancelled.
    #[error("Transcode cancelled")]
    Cancelled,
}

impl TranscoderError {
    /// Creates a new encoding failed error with stderr output.
    pub fn encoding_failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::EncodingFailed {
            reason: reason.into(),
            stderr,
        }
    }

    /// Creates a new probe failed error.
    pub fn probe_failed(reason: impl Into<String>) -> Self {
        Self::ProbeFailed {
            reason: reason.into(),
        }
    }

    /// Creates a new invalid composition error.
    pub fn invalid_composition(reason: impl Into<String>) -> Self {
        Self::InvalidComposition {
            reason: reason.into(),
        }
    }

    /// Creates a generic failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Classifies this error for operation listeners.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::EncodingFailed { .. } | Self::DecodingFailed { .. } | Self::ProbeFailed { .. } => {
                ErrorKind::CodecFailure
            }
            Self::InvalidComposition { .. } | Self::InputNotFound { .. } => ErrorKind::InvalidInput,
            Self::InsufficientStorage { .. } => ErrorKind::InsufficientStorage,
            Self::InsufficientMemory { .. } => ErrorKind::InsufficientMemory,
            Self::Cancelled => ErrorKind::OperationCancelled,
            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::StorageFull => ErrorKind::InsufficientStorage,
                std::io::ErrorKind::OutOfMemory => ErrorKind::InsufficientMemory,
                _ => ErrorKind::Unknown,
            },
            Self::Failed { reason } => {
                let reason = reason.to_lowercase();
                if reason.contains("storage") || reason.contains("space") {
                    ErrorKind::InsufficientStorage
                } else if reason.contains("memory") {
                    ErrorKind::InsufficientMemory
                } else {
                    ErrorKind::Unknown
                }
            }
            Self::FfmpegNotFound { .. } | Self::FfprobeNotFound { .. } => ErrorKind::Unknown,
        }
    }
}

impl From<TranscoderError> for OperationError {
    fn from(err: TranscoderError) -> Self {
        OperationError::new(err.error_kind(), err.to_string())
    }
}
