//! Batch files: a TOML list of edits to run in one go.
//!
//! ```toml
//! [[operation]]
//! type = "trim"
//! input = "clips/a.mp4"
//! start_ms = 1000
//! end_ms = 4000
//!
//! [[operation]]
//! type = "merge"
//! inputs = ["clips/a.mp4", "clips/b.mp4"]
//! output = "merged.mp4"
//! remove_audio = true
//! priority = "high"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use clipq_core::{EditRequest, OperationPriority};

#[derive(Debug, Deserialize)]
pub struct BatchFile {
    #[serde(default)]
    pub operation: Vec<BatchOperation>,
}

/// One edit plus its per-run options.
#[derive(Debug, Deserialize)]
pub struct BatchOperation {
    #[serde(flatten)]
    pub edit: BatchEdit,
    /// Destination. Generated under the configured output dir when unset.
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub priority: OperationPriority,
    #[serde(default)]
    pub remove_audio: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEdit {
    Trim {
        input: PathBuf,
        start_ms: u64,
        end_ms: u64,
    },
    Rotate {
        input: PathBuf,
        degrees: f32,
    },
    Merge {
        inputs: Vec<PathBuf>,
    },
    TrimAndRotate {
        input: PathBuf,
        start_ms: u64,
        end_ms: u64,
        degrees: f32,
    },
}

impl BatchFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file {:?}", path))?;
        Self::parse(&text).with_context(|| format!("Invalid batch file {:?}", path))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

impl BatchOperation {
    /// Builds the request. `stamp` and `index` keep generated names unique.
    pub fn to_request(
        &self,
        output_dir: &Path,
        extension: &str,
        stamp: i64,
        index: usize,
    ) -> EditRequest {
        let output = self.output.clone().unwrap_or_else(|| {
            output_dir.join(format!("output_{}_{}.{}", stamp, index, extension))
        });

        let request = match &self.edit {
            BatchEdit::Trim {
                input,
                start_ms,
                end_ms,
            } => EditRequest::trim(input, *start_ms, *end_ms, output),
            BatchEdit::Rotate { input, degrees } => EditRequest::rotate(input, *degrees, output),
            BatchEdit::Merge { inputs } => EditRequest::merge(inputs.iter().cloned(), output),
            BatchEdit::TrimAndRotate {
                input,
                start_ms,
                end_ms,
                degrees,
            } => EditRequest::trim_and_rotate(input, *start_ms, *end_ms, *degrees, output),
        };
        request.with_remove_audio(self.remove_audio)
    }
}
