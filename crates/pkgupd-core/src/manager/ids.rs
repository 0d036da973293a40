//! External job identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::job::JobType;

/// Source of job ids. Every stage of a chained operation shares the id
/// handed out for its head.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self, kind: JobType) -> String;
}

/// Monotonic `<seq><kind>` ids, e.g. `3install`.
#[derive(Debug)]
pub struct SequenceIds {
    next: AtomicU64,
}

impl SequenceIds {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequenceIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequenceIds {
    fn next_id(&self, kind: JobType) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{n}{}", kind.as_str())
    }
}
