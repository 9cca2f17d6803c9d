//! Listener surface for operation progress and outcomes.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::error::OperationError;
use super::types::{OperationId, OperationKind, OperationState};

/// One progress sample for an operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub id: OperationId,
    /// Fraction in `[0.0, 1.0]`.
    pub fraction: f32,
    pub stage: OperationState,
    pub memory_usage_bytes: u64,
    pub kind: OperationKind,
    /// Estimated time remaining, once enough progress has been observed.
    pub eta: Option<Duration>,
}

/// Receives progress and terminal outcomes for operations.
///
/// Callbacks are invoked from worker tasks, never while scheduler state is
/// locked. Implementations must not block.
pub trait OperationListener: Send + Sync {
    fn on_progress(&self, update: &ProgressUpdate);

    /// Called exactly once per operation on success.
    fn on_success(&self, id: &OperationId, output: &Path);

    /// Called exactly once per operation on failure, including cancellation.
    fn on_failure(&self, id: &OperationId, error: &OperationError);
}

/// Listener that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl OperationListener for NoopListener {
    fn on_progress(&self, _update: &ProgressUpdate) {}
    fn on_success(&self, _id: &OperationId, _output: &Path) {}
    fn on_failure(&self, _id: &OperationId, _error: &OperationError) {}
}

/// Per-operation handle to a listener that delivers at most one terminal
/// callback, no matter how many code paths try to report one.
#[derive(Clone)]
pub struct Reporter {
    id: OperationId,
    listener: Arc<dyn OperationListener>,
    done: Arc<AtomicBool>,
}

impl Reporter {
    pub fn new(id: OperationId, listener: Arc<dyn OperationListener>) -> Self {
        Self {
            id,
            listener,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &OperationId {
        &self.id
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Forwards a progress sample unless the operation already terminated.
    pub fn progress(&self, update: &ProgressUpdate) {
        if !self.is_done() {
            self.listener.on_progress(update);
        }
    }

    /// Reports success. Returns false if a terminal outcome was already sent.
    pub fn success(&self, output: &Path) -> bool {
        if !self.claim() {
            return false;
        }
        self.listener.on_success(&self.id, output);
        true
    }

    /// Reports failure. Returns false if a terminal outcome was already sent.
    pub fn failure(&self, error: &OperationError) -> bool {
        if !self.claim() {
            debug!(id = %self.id, error = %error, "Dropping duplicate terminal report");
            return false;
        }
        self.listener.on_failure(&self.id, error);
        true
    }

    fn claim(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("id", &self.id)
            .field("done", &self.is_done())
            .finish()
    }
}

/// Listener callbacks as a value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OperationEvent {
    Progress(ProgressUpdate),
    Succeeded { id: OperationId, output: PathBuf },
    Failed { id: OperationId, error: OperationError },
}

impl OperationEvent {
    pub fn id(&self) -> &OperationId {
        match self {
            Self::Progress(update) => &update.id,
            Self::Succeeded { id, .. } | Self::Failed { id, .. } => id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

/// Listener that forwards callbacks into channels.
///
/// Progress goes through a bounded channel and is dropped when the consumer
/// falls behind. Terminal events use an unbounded channel and are never lost.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    progress_tx: mpsc::Sender<ProgressUpdate>,
    terminal_tx: mpsc::UnboundedSender<OperationEvent>,
}

/// Receiving half of a [`ChannelListener`].
#[derive(Debug)]
pub struct EventStream {
    progress_rx: mpsc::Receiver<ProgressUpdate>,
    terminal_rx: mpsc::UnboundedReceiver<OperationEvent>,
}

impl ChannelListener {
    pub fn new(progress_capacity: usize) -> (Self, EventStream) {
        let (progress_tx, progress_rx) = mpsc::channel(progress_capacity.max(1));
        let (terminal_tx, terminal_rx) = mpsc::unbounded_channel();
        (
            Self {
                progress_tx,
                terminal_tx,
            },
            EventStream {
                progress_rx,
                terminal_rx,
            },
        )
    }
}

impl OperationListener for ChannelListener {
    fn on_progress(&self, update: &ProgressUpdate) {
        if self.progress_tx.try_send(update.clone()).is_err() {
            debug!(id = %update.id, "Progress channel full or closed, dropping sample");
        }
    }

    fn on_success(&self, id: &OperationId, output: &Path) {
        let _ = self.terminal_tx.send(OperationEvent::Succeeded {
            id: id.clone(),
            output: output.to_path_buf(),
        });
    }

    fn on_failure(&self, id: &OperationId, error: &OperationError) {
        let _ = self.terminal_tx.send(OperationEvent::Failed {
            id: id.clone(),
            error: error.clone(),
        });
    }
}

impl EventStream {
    /// Next event, preferring queued progress over terminal events.
    ///
    /// Returns `None` once every sender is gone and both channels are drained.
    pub async fn recv(&mut self) -> Option<OperationEvent> {
        tokio::select! {
            biased;
            Some(update) = self.progress_rx.recv() => Some(OperationEvent::Progress(update)),
            Some(event) = self.terminal_rx.recv() => Some(event),
            else => None,
        }
    }
}
