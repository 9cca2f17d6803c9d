//! Mock memory probe for testing.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::monitor::MemoryProbe;

/// Memory probe with settable readings.
#[derive(Debug, Default)]
pub struct MockMemoryProbe {
    used: AtomicU64,
    max: AtomicU64,
}

impl MockMemoryProbe {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            used: AtomicU64::new(0),
            max: AtomicU64::new(max_bytes),
        }
    }

    pub fn set_used(&self, bytes: u64) {
        self.used.store(bytes, Ordering::SeqCst);
    }

    pub fn set_max(&self, bytes: u64) {
        self.max.store(bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for MockMemoryProbe {
    fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    fn max_bytes(&self) -> u64 {
        self.max.load(Ordering::SeqCst)
    }
}
