//! Latest-state view of operations for polling consumers.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::operation::{
    OperationError, OperationId, OperationKind, OperationListener, OperationState,
    ProgressUpdate,
};

/// What a consumer sees about one operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationView {
    pub kind: Option<OperationKind>,
    /// `None` until the first callback.
    pub stage: Option<OperationState>,
    pub progress: f32,
    pub memory_usage_bytes: u64,
    pub eta: Option<Duration>,
    pub output: Option<PathBuf>,
    pub error: Option<OperationError>,
}

impl OperationView {
    pub fn is_finished(&self) -> bool {
        self.stage.is_some_and(|s| s.is_terminal())
    }
}

/// [`OperationListener`] that records the latest view per operation.
#[derive(Debug, Default)]
pub struct OperationTracker {
    views: Mutex<HashMap<OperationId, OperationView>>,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self, id: &OperationId) -> Option<OperationView> {
        self.lock().get(id).cloned()
    }

    pub fn views(&self) -> HashMap<OperationId, OperationView> {
        self.lock().clone()
    }

    /// Number of operations not yet finished.
    pub fn in_flight(&self) -> usize {
        self.lock().values().filter(|v| !v.is_finished()).count()
    }

    pub fn remove(&self, id: &OperationId) -> Option<OperationView> {
        self.lock().remove(id)
    }

    /// Drops finished operations and returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut views = self.lock();
        let before = views.len();
        views.retain(|_, v| !v.is_finished());
        before - views.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OperationId, OperationView>> {
        self.views.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OperationListener for OperationTracker {
    fn on_progress(&self, update: &ProgressUpdate) {
        let mut views = self.lock();
        let view = views.entry(update.id.clone()).or_default();
        view.kind = Some(update.kind.clone());
        view.stage = Some(update.stage);
        view.progress = view.progress.max(update.fraction);
        view.memory_usage_bytes = update.memory_usage_bytes;
        view.eta = update.eta;
    }

    fn on_success(&self, id: &OperationId, output: &Path) {
        let mut views = self.lock();
        let view = views.entry(id.clone()).or_default();
        view.stage = Some(OperationState::Completed);
        view.progress = 1.0;
        view.eta = Some(Duration::ZERO);
        view.output = Some(output.to_path_buf());
    }

    fn on_failure(&self, id: &OperationId, error: &OperationError) {
        let mut views = self.lock();
        let view = views.entry(id.clone()).or_default();
        view.stage = Some(OperationState::Error);
        view.eta = None;
        view.error = Some(error.clone());
    }
}
