//! Listener that records every callback for assertions.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::operation::{
    OperationError, OperationEvent, OperationId, OperationListener, ProgressUpdate,
};

#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<OperationEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// All callbacks in arrival order.
    pub fn events(&self) -> Vec<OperationEvent> {
        self.lock().clone()
    }

    pub fn progress_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|e| matches!(e, OperationEvent::Progress(_)))
            .count()
    }

    pub fn progress_values(&self) -> Vec<f32> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                OperationEvent::Progress(update) => Some(update.fraction),
                _ => None,
            })
            .collect()
    }

    pub fn successes(&self) -> Vec<(OperationId, PathBuf)> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                OperationEvent::Succeeded { id, output } => Some((id.clone(), output.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<(OperationId, OperationError)> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                OperationEvent::Failed { id, error } => Some((id.clone(), error.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn terminal_count(&self) -> usize {
        self.lock().iter().filter(|e| e.is_terminal()).count()
    }

    /// Terminal callbacks for one operation.
    pub fn terminal_events_for(&self, id: &OperationId) -> Vec<OperationEvent> {
        self.lock()
            .iter()
            .filter(|e| e.is_terminal() && e.id() == id)
            .cloned()
            .collect()
    }

    /// Waits until at least `n` terminal callbacks arrived. Panics after
    /// `timeout`.
    pub async fn wait_for_terminal(&self, n: usize, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.terminal_count() < n {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {} terminal callbacks, saw {}",
                n,
                self.terminal_count()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OperationEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OperationListener for RecordingListener {
    fn on_progress(&self, update: &ProgressUpdate) {
        self.lock().push(OperationEvent::Progress(update.clone()));
    }

    fn on_success(&self, id: &OperationId, output: &Path) {
        self.lock().push(OperationEvent::Succeeded {
            id: id.clone(),
            output: output.to_path_buf(),
        });
    }

    fn on_failure(&self, id: &OperationId, error: &OperationError) {
        self.lock().push(OperationEvent::Failed {
            id: id.clone(),
            error: error.clone(),
        });
    }
}
