//! Error taxonomy reported to operation listeners.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of an operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad parameters, rejected before the operation enters the queue.
    InvalidInput,
    InsufficientStorage,
    InsufficientMemory,
    /// Encode or decode failure reported by the transcoder.
    CodecFailure,
    OperationCancelled,
    /// Failure copying the result to its final destination.
    IoFailure,
    DuplicateOperation,
    SchedulerClosed,
    Unknown,
}

impl ErrorKind {
    /// Whether a caller may reasonably retry. Advisory only; nothing in this
    /// crate retries automatically.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientStorage | Self::InsufficientMemory | Self::OperationCancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::InsufficientStorage => "insufficient_storage",
            Self::InsufficientMemory => "insufficient_memory",
            Self::CodecFailure => "codec_failure",
            Self::OperationCancelled => "operation_cancelled",
            Self::IoFailure => "io_failure",
            Self::DuplicateOperation => "duplicate_operation",
            Self::SchedulerClosed => "scheduler_closed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal operation failure: a kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct OperationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl OperationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::OperationCancelled, "operation cancelled")
    }

    pub fn insufficient_memory(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InsufficientMemory, message)
    }

    pub fn duplicate(id: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::DuplicateOperation,
            format!("operation {} is already scheduled", id),
        )
    }

    pub fn scheduler_closed() -> Self {
        Self::new(ErrorKind::SchedulerClosed, "scheduler is shut down")
    }

    pub fn io_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IoFailure, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Maps an error raised while saving the result.
    ///
    /// A full disk is reported as storage exhaustion so callers can retry
    /// after freeing space; everything else is an I/O failure.
    pub fn from_io(context: &str, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::StorageFull => ErrorKind::InsufficientStorage,
            std::io::ErrorKind::OutOfMemory => ErrorKind::InsufficientMemory,
            _ => ErrorKind::IoFailure,
        };
        Self::new(kind, format!("{}: {}", context, err))
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::OperationCancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(ErrorKind::InsufficientStorage.is_recoverable());
        assert!(ErrorKind::InsufficientMemory.is_recoverable());
        assert!(ErrorKind::OperationCancelled.is_recoverable());

        assert!(!ErrorKind::InvalidInput.is_recoverable());
        assert!(!ErrorKind::CodecFailure.is_recoverable());
        assert!(!ErrorKind::IoFailure.is_recoverable());
        assert!(!ErrorKind::DuplicateOperation.is_recoverable());
        assert!(!ErrorKind::SchedulerClosed.is_recoverable());
        assert!(!ErrorKind::Unknown.is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = OperationError::invalid_input("End time must be greater than start time");
        assert_eq!(
            err.to_string(),
            "invalid_input: End time must be greater than start time"
        );
    }

    #[test]
    fn test_from_io() {
        let full = std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full");
        assert_eq!(
            OperationError::from_io("copy", &full).kind,
            ErrorKind::InsufficientStorage
        );

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err = OperationError::from_io("copy", &denied);
        assert_eq!(err.kind, ErrorKind::IoFailure);
        assert!(err.message.starts_with("copy:"));
    }
}
