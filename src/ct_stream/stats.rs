// Processed-entry counters
//
// Two process-wide counters incremented by the scan workers and read by
// the status introspection layer.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts of successfully processed entries, by leaf kind.
#[derive(Debug, Default)]
pub struct ProcessedCounters {
    certs: AtomicU64,
    precerts: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessedSnapshot {
    pub certs: u64,
    pub precerts: u64,
}

impl ProcessedCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_certs(&self) {
        self.certs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_precerts(&self) {
        self.precerts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProcessedSnapshot {
        ProcessedSnapshot {
            certs: self.certs.load(Ordering::Relaxed),
            precerts: self.precerts.load(Ordering::Relaxed),
        }
    }
}
