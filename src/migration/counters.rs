//! Shared run counters, updated lock-free by the workers.

use crate::progress::MigrationStats;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Outcome of one file, as seen by the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Written to the destination
    Migrated { bytes_in: u64, bytes_out: u64 },
    /// Destination already holds a migrated copy
    Skipped,
    Failed,
}

#[derive(Debug, Default)]
pub struct MigrationCounters {
    processed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl MigrationCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: FileOutcome) {
        // processed is bumped first so failed <= processed holds for any reader
        self.processed.fetch_add(1, Ordering::SeqCst);
        match outcome {
            FileOutcome::Migrated { bytes_in, bytes_out } => {
                self.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
                self.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
            }
            FileOutcome::Skipped => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
            FileOutcome::Failed => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    pub fn snapshot(&self) -> MigrationStats {
        MigrationStats {
            processed: self.processed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}
