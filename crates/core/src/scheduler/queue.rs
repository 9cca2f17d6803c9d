//! Pending queue with admission ordering.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;

use crate::operation::{OperationId, OperationPriority};

use super::types::ScheduledOperation;

/// A queued operation with its ordering metadata.
#[derive(Debug)]
pub(crate) struct PendingEntry {
    pub op: ScheduledOperation,
    pub created_at: DateTime<Utc>,
    /// Enqueue order, breaks ties between equal timestamps.
    pub seq: u64,
    /// Went back to the queue after being active.
    pub requeued: bool,
    /// Paused by the caller; not admitted until resumed.
    pub held: bool,
    /// Admissions so far.
    pub attempts: u32,
}

impl PendingEntry {
    pub fn new(op: ScheduledOperation, created_at: DateTime<Utc>, seq: u64) -> Self {
        Self {
            op,
            created_at,
            seq,
            requeued: false,
            held: false,
            attempts: 0,
        }
    }

    fn sort_key(&self) -> (Reverse<OperationPriority>, bool, DateTime<Utc>, u64) {
        (
            Reverse(self.op.priority),
            !self.requeued,
            self.created_at,
            self.seq,
        )
    }
}

/// Operations waiting for a worker slot.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    entries: Vec<PendingEntry>,
}

impl PendingQueue {
    pub fn push(&mut self, entry: PendingEntry) {
        self.entries.push(entry);
    }

    pub fn contains(&self, id: &OperationId) -> bool {
        self.entries.iter().any(|e| &e.op.id == id)
    }

    pub fn get_mut(&mut self, id: &OperationId) -> Option<&mut PendingEntry> {
        self.entries.iter_mut().find(|e| &e.op.id == id)
    }

    pub fn get(&self, id: &OperationId) -> Option<&PendingEntry> {
        self.entries.iter().find(|e| &e.op.id == id)
    }

    pub fn remove(&mut self, id: &OperationId) -> Option<PendingEntry> {
        let index = self.entries.iter().position(|e| &e.op.id == id)?;
        Some(self.entries.remove(index))
    }

    /// Removes and returns the next admissible entry.
    ///
    /// Held entries are skipped, and so are Low entries unless `allow_low`.
    pub fn pop_next(&mut self, allow_low: bool) -> Option<PendingEntry> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.held)
            .filter(|(_, e)| allow_low || e.op.priority != OperationPriority::Low)
            .min_by_key(|(_, e)| e.sort_key())
            .map(|(i, _)| i)?;
        Some(self.entries.remove(index))
    }

    pub fn drain(&mut self) -> Vec<PendingEntry> {
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_by_key(|e| e.sort_key());
        entries
    }

    /// Ids in admission order, held entries included.
    pub fn ids_in_order(&self) -> Vec<OperationId> {
        let mut entries: Vec<&PendingEntry> = self.entries.iter().collect();
        entries.sort_by_key(|e| e.sort_key());
        entries.into_iter().map(|e| e.op.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn held_count(&self) -> usize {
        self.entries.iter().filter(|e| e.held).count()
    }
}
