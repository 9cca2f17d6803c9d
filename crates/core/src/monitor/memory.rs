//! Process memory sampling.

use std::sync::{Arc, Mutex, PoisonError};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tracing::warn;

/// Source of process memory figures.
pub trait MemoryProbe: Send + Sync {
    /// Memory currently used by this process, in bytes.
    fn used_bytes(&self) -> u64;

    /// Declared maximum the process may use, in bytes.
    fn max_bytes(&self) -> u64;
}

/// [`MemoryProbe`] backed by `sysinfo`.
///
/// Usage is the resident set size of the current process. The maximum is the
/// configured limit, or total system memory when none is set.
pub struct SystemMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
    max_bytes: u64,
}

impl SystemMemoryProbe {
    pub fn new(max_bytes: Option<u64>) -> Self {
        let mut system = System::new_with_specifics(RefreshKind::nothing());
        system.refresh_memory();

        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Cannot determine current pid, memory usage will read as zero: {}", e);
                None
            }
        };
        let max_bytes = max_bytes.unwrap_or_else(|| system.total_memory());

        Self {
            system: Mutex::new(system),
            pid,
            max_bytes,
        }
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn used_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }

    fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}

/// One memory reading against the configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub ceiling_bytes: u64,
}

impl MemorySample {
    pub fn exceeded(&self) -> bool {
        self.ceiling_bytes > 0 && self.used_bytes > self.ceiling_bytes
    }
}

/// A probe paired with a ceiling ratio.
#[derive(Clone)]
pub struct MemoryWatch {
    probe: Arc<dyn MemoryProbe>,
    ceiling_ratio: f64,
}

impl MemoryWatch {
    pub fn new(probe: Arc<dyn MemoryProbe>, ceiling_ratio: f64) -> Self {
        Self {
            probe,
            ceiling_ratio,
        }
    }

    pub fn ceiling_bytes(&self) -> u64 {
        (self.probe.max_bytes() as f64 * self.ceiling_ratio) as u64
    }

    pub fn sample(&self) -> MemorySample {
        MemorySample {
            used_bytes: self.probe.used_bytes(),
            ceiling_bytes: self.ceiling_bytes(),
        }
    }
}

impl std::fmt::Debug for MemoryWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWatch")
            .field("ceiling_ratio", &self.ceiling_ratio)
            .finish()
    }
}
