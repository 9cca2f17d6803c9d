//! Types for edit operations and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::error::OperationError;

/// Opaque identifier of a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Generates a new unique id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OperationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for OperationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The edit an operation performs, with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    /// Clip a single input to `[start_ms, end_ms]`.
    Trim { start_ms: u64, end_ms: u64 },
    /// Apply a rotation effect to a single input.
    Rotate { degrees: f32 },
    /// Concatenate `input_count` inputs in order.
    Merge { input_count: usize },
    /// Clip and rotate a single input.
    TrimAndRotate {
        start_ms: u64,
        end_ms: u64,
        degrees: f32,
    },
}

impl OperationKind {
    /// Stable name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Trim { .. } => "trim",
            Self::Rotate { .. } => "rotate",
            Self::Merge { .. } => "merge",
            Self::TrimAndRotate { .. } => "trim_and_rotate",
        }
    }

    /// File name prefix for this kind's scratch files.
    pub fn temp_prefix(&self) -> &'static str {
        match self {
            Self::Trim { .. } => "trim",
            Self::Rotate { .. } => "rotate",
            Self::Merge { .. } => "merge",
            Self::TrimAndRotate { .. } => "trim_rotate",
        }
    }

    /// Clip window, for kinds that clip.
    pub fn clip_range(&self) -> Option<(u64, u64)> {
        match self {
            Self::Trim { start_ms, end_ms } | Self::TrimAndRotate { start_ms, end_ms, .. } => {
                Some((*start_ms, *end_ms))
            }
            Self::Rotate { .. } | Self::Merge { .. } => None,
        }
    }

    /// Rotation in degrees, for kinds that rotate.
    pub fn rotation(&self) -> Option<f32> {
        match self {
            Self::Rotate { degrees } | Self::TrimAndRotate { degrees, .. } => Some(*degrees),
            Self::Trim { .. } | Self::Merge { .. } => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scheduling priority. Ordered so that `High > Normal > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OperationPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl OperationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl fmt::Display for OperationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    #[default]
    Idle,
    Preparing,
    Processing,
    Saving,
    Completed,
    Error,
}

impl OperationState {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Returns true if the transition `self -> next` is allowed.
    ///
    /// Preparing and Processing may fall back to Idle: a paused run is
    /// discarded and restarted from scratch later.
    pub fn can_transition_to(&self, next: OperationState) -> bool {
        use OperationState::*;
        match (self, next) {
            (Idle, Preparing)
            | (Preparing, Processing)
            | (Processing, Saving)
            | (Saving, Completed)
            | (Preparing | Processing, Idle) => true,
            (from, Error) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Processing => "processing",
            Self::Saving => "saving",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tracked state of one submitted operation.
///
/// Records are published through `tokio::sync::watch` channels; the task
/// that owns the run is the only writer and readers clone snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRecord {
    pub id: OperationId,
    pub kind: OperationKind,
    pub priority: OperationPriority,
    pub state: OperationState,
    /// Fraction in `[0.0, 1.0]`, non-decreasing while processing.
    pub progress: f32,
    /// Last sampled process memory usage. Advisory only.
    pub memory_usage_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Scratch file owned by the current run, if any.
    pub temp_resource: Option<PathBuf>,
    /// Final destination, set only on completion.
    pub output: Option<PathBuf>,
    /// Failure details, set only on error.
    pub error: Option<OperationError>,
}

impl OperationRecord {
    pub fn new(
        id: OperationId,
        kind: OperationKind,
        priority: OperationPriority,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            priority,
            state: OperationState::Idle,
            progress: 0.0,
            memory_usage_bytes: 0,
            created_at,
            started_at: None,
            finished_at: None,
            temp_resource: None,
            output: None,
            error: None,
        }
    }

    /// Moves to `next` if the transition is allowed. Returns false otherwise.
    pub fn advance(&mut self, next: OperationState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        if next == OperationState::Preparing {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.state = next;
        true
    }

    /// Raises progress to `fraction`, clamped to `[0, 1]`. Never lowers it.
    pub fn set_progress(&mut self, fraction: f32) {
        if !fraction.is_finite() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction > self.progress {
            self.progress = fraction;
        }
    }

    /// Terminal success.
    pub fn complete(&mut self, output: PathBuf) -> bool {
        if !self.advance(OperationState::Completed) {
            return false;
        }
        self.progress = 1.0;
        self.output = Some(output);
        self.temp_resource = None;
        true
    }

    /// Terminal failure.
    pub fn fail(&mut self, error: OperationError) -> bool {
        if !self.advance(OperationState::Error) {
            return false;
        }
        self.error = Some(error);
        self.temp_resource = None;
        true
    }

    /// Discards the current run and returns to Idle.
    pub fn reset(&mut self) -> bool {
        if !self.advance(OperationState::Idle) {
            return false;
        }
        self.progress = 0.0;
        self.temp_resource = None;
        self.started_at = None;
        true
    }
}
