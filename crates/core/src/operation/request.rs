//! Edit requests as submitted by callers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::error::OperationError;
use super::types::OperationKind;

/// One edit to perform: what to do, on which inputs, and where to write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditRequest {
    pub kind: OperationKind,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    /// Drop the audio track from the result.
    #[serde(default)]
    pub remove_audio: bool,
}

impl EditRequest {
    pub fn trim(
        input: impl Into<PathBuf>,
        start_ms: u64,
        end_ms: u64,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kind: OperationKind::Trim { start_ms, end_ms },
            inputs: vec![input.into()],
            output: output.into(),
            remove_audio: false,
        }
    }

    pub fn rotate(input: impl Into<PathBuf>, degrees: f32, output: impl Into<PathBuf>) -> Self {
        Self {
            kind: OperationKind::Rotate { degrees },
            inputs: vec![input.into()],
            output: output.into(),
            remove_audio: false,
        }
    }

    pub fn merge<I, P>(inputs: I, output: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let inputs: Vec<PathBuf> = inputs.into_iter().map(Into::into).collect();
        Self {
            kind: OperationKind::Merge {
                input_count: inputs.len(),
            },
            inputs,
            output: output.into(),
            remove_audio: false,
        }
    }

    pub fn trim_and_rotate(
        input: impl Into<PathBuf>,
        start_ms: u64,
        end_ms: u64,
        degrees: f32,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kind: OperationKind::TrimAndRotate {
                start_ms,
                end_ms,
                degrees,
            },
            inputs: vec![input.into()],
            output: output.into(),
            remove_audio: false,
        }
    }

    /// Builder-style toggle for audio removal.
    pub fn with_remove_audio(mut self, remove_audio: bool) -> Self {
        self.remove_audio = remove_audio;
        self
    }

    /// Checks parameters before anything is queued or allocated.
    pub fn validate(&self) -> Result<(), OperationError> {
        if self.output.as_os_str().is_empty() {
            return Err(OperationError::invalid_input("Output path must not be empty"));
        }
        if self.inputs.iter().any(|p| p.as_os_str().is_empty()) {
            return Err(OperationError::invalid_input("Input paths must not be empty"));
        }

        match &self.kind {
            OperationKind::Trim { start_ms, end_ms } => {
                self.expect_single_input()?;
                check_clip(*start_ms, *end_ms)
            }
            OperationKind::Rotate { degrees } => {
                self.expect_single_input()?;
                check_degrees(*degrees)
            }
            OperationKind::Merge { input_count } => {
                if self.inputs.len() < 2 {
                    return Err(OperationError::invalid_input(
                        "At least two videos required for merging",
                    ));
                }
                if *input_count != self.inputs.len() {
                    return Err(OperationError::invalid_input(format!(
                        "Merge declares {} inputs but {} were given",
                        input_count,
                        self.inputs.len()
                    )));
                }
                Ok(())
            }
            OperationKind::TrimAndRotate {
                start_ms,
                end_ms,
                degrees,
            } => {
                self.expect_single_input()?;
                check_clip(*start_ms, *end_ms)?;
                check_degrees(*degrees)
            }
        }
    }

    fn expect_single_input(&self) -> Result<(), OperationError> {
        if self.inputs.len() != 1 {
            return Err(OperationError::invalid_input(format!(
                "{} takes exactly one input, got {}",
                self.kind.name(),
                self.inputs.len()
            )));
        }
        Ok(())
    }
}

fn check_clip(start_ms: u64, end_ms: u64) -> Result<(), OperationError> {
    if start_ms >= end_ms {
        return Err(OperationError::invalid_input(
            "End time must be greater than start time",
        ));
    }
    Ok(())
}

fn check_degrees(degrees: f32) -> Result<(), OperationError> {
    if !degrees.is_finite() {
        return Err(OperationError::invalid_input("Rotation must be a finite angle"));
    }
    Ok(())
}
