//! Lock-free progress cell shared between a transcoder and its monitor.

use std::sync::atomic::{AtomicU32, Ordering};

const NOT_STARTED: u32 = u32::MAX;
const UNAVAILABLE: u32 = u32::MAX - 1;
/// Stored values are hundredths of a percent.
const SCALE: f32 = 100.0;

/// Progress as observed by a monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressState {
    /// The transcoder has not reported anything yet.
    NotStarted,
    /// The transcoder cannot estimate progress for this job.
    Unavailable,
    /// Percentage in `[0, 100]`.
    Percent(f32),
}

impl ProgressState {
    /// Progress as a fraction in `[0, 1]`, if known.
    pub fn fraction(&self) -> Option<f32> {
        match self {
            Self::Percent(p) => Some((p / 100.0).clamp(0.0, 1.0)),
            Self::NotStarted | Self::Unavailable => None,
        }
    }
}

/// Written by the transcoder, read by the monitor.
#[derive(Debug)]
pub struct ProgressHolder {
    value: AtomicU32,
}

impl ProgressHolder {
    pub fn new() -> Self {
        Self {
            value: AtomicU32::new(NOT_STARTED),
        }
    }

    pub fn get(&self) -> ProgressState {
        match self.value.load(Ordering::Acquire) {
            NOT_STARTED => ProgressState::NotStarted,
            UNAVAILABLE => ProgressState::Unavailable,
            v => ProgressState::Percent(v as f32 / SCALE),
        }
    }

    /// Stores a percentage, clamped to `[0, 100]`.
    pub fn set_percent(&self, percent: f32) {
        if !percent.is_finite() {
            return;
        }
        let scaled = (percent.clamp(0.0, 100.0) * SCALE).round() as u32;
        self.value.store(scaled, Ordering::Release);
    }

    pub fn set_unavailable(&self) {
        self.value.store(UNAVAILABLE, Ordering::Release);
    }

    pub fn reset(&self) {
        self.value.store(NOT_STARTED, Ordering::Release);
    }
}

impl Default for ProgressHolder {
    fn default() -> Self {
        Self::new()
    }
}
