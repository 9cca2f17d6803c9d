//! Cooperative stop signal for a single run.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Why a run was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Caller cancelled the operation.
    Cancelled,
    /// Caller paused the operation; it is re-queued and held.
    Paused,
    /// Scheduler shed a low-priority run under memory pressure; it is re-queued.
    MemoryPressure,
    /// Memory stayed above the ceiling past the abort grace period.
    MemoryExhausted,
    /// The scheduler or executor is shutting down.
    Shutdown,
}

impl StopReason {
    /// Whether the operation goes back to the queue instead of terminating.
    pub fn requeues(&self) -> bool {
        matches!(self, Self::Paused | Self::MemoryPressure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
            Self::MemoryPressure => "memory_pressure",
            Self::MemoryExhausted => "memory_exhausted",
            Self::Shutdown => "shutdown",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Cancelled => 1,
            Self::Paused => 2,
            Self::MemoryPressure => 3,
            Self::MemoryExhausted => 4,
            Self::Shutdown => 5,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Cancelled),
            2 => Some(Self::Paused),
            3 => Some(Self::MemoryPressure),
            4 => Some(Self::MemoryExhausted),
            5 => Some(Self::Shutdown),
            _ => None,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cancellation token that also records why it was fired.
///
/// Clones share state. The first reason sticks, except that a terminal
/// reason replaces a re-queue reason: a cancel that lands while a pause is
/// still unwinding ends the operation instead of sending it back.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
    reason: Arc<AtomicU8>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Returns true if this call set the reason.
    pub fn stop(&self, reason: StopReason) -> bool {
        let updated = self
            .reason
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match StopReason::from_u8(current) {
                    None => Some(reason.to_u8()),
                    Some(prev) if prev.requeues() && !reason.requeues() => Some(reason.to_u8()),
                    Some(_) => None,
                }
            })
            .is_ok();
        self.token.cancel();
        updated
    }

    pub fn reason(&self) -> Option<StopReason> {
        StopReason::from_u8(self.reason.load(Ordering::Acquire))
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token handed to the transcoder.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves once the signal fires.
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}
