//! Run statistics, gathered with relaxed atomics so workers never contend
//! on a lock just to count.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct CreateStats {
    directories: AtomicU64,
    files: AtomicU64,
    bytes: AtomicU64,
    blocks: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
}

impl CreateStats {
    pub fn record_directory(&self) {
        self.directories.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file(&self, size: u64) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn record_block(&self) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Excluded entries and entry kinds the format does not carry.
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Recoverable per-entry failures (unlistable directory, unreadable file).
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self, elapsed: Duration) -> CreateSummary {
        CreateSummary {
            directories: self.directories.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Outcome of a successful creation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSummary {
    pub directories: u64,
    pub files: u64,
    pub bytes: u64,
    pub blocks: u64,
    pub skipped: u64,
    pub errors: u64,
    pub elapsed: Duration,
}

impl CreateSummary {
    pub fn throughput_mib_s(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / (1024.0 * 1024.0) / secs
        } else {
            0.0
        }
    }
}

/// Outcome of a successful extraction or listing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub directories: u64,
    pub files: u64,
    pub bytes: u64,
    pub blocks: u64,
}
