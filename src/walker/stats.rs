//! Walk counters shared between workers and the progress display

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters bumped by task functions
#[derive(Debug, Default)]
pub struct WalkCounters {
    pub dirs: AtomicU64,
    pub files: AtomicU64,
    pub bytes: AtomicU64,
    pub errors: AtomicU64,
}

impl WalkCounters {
    /// Count one processed directory
    pub fn add_dir(&self) {
        self.dirs.fetch_add(1, Ordering::Relaxed);
    }

    /// Count processed files and their bytes
    pub fn add_files(&self, files: u64, bytes: u64) {
        self.files.fetch_add(files, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Count a per-entry failure that did not fail the whole task
    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot for display
    pub fn progress(&self, elapsed: Duration) -> WalkProgress {
        WalkProgress {
            dirs: self.dirs.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Progress information for display
#[derive(Debug, Clone, Default)]
pub struct WalkProgress {
    pub dirs: u64,
    pub files: u64,
    pub bytes: u64,
    pub errors: u64,
    pub elapsed: Duration,
}

impl WalkProgress {
    pub fn files_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.files + self.dirs) as f64 / secs
        } else {
            0.0
        }
    }
}

/// Result of a completed walk
#[derive(Debug, Clone, Default)]
pub struct WalkResult {
    /// Directories processed
    pub dirs: u64,

    /// Files (or rows, for queries) produced
    pub files: u64,

    /// Total bytes (sum of file sizes)
    pub bytes: u64,

    /// Failed tasks plus per-entry failures
    pub errors: u64,

    /// Subtrees skipped because a child item could not be built
    pub pruned: u64,

    /// Worker threads run
    pub threads: u64,

    /// Time taken for the walk
    pub duration: Duration,
}

impl WalkResult {
    /// Assemble a result from the counters and the pool's own statistics
    pub fn from_counters(
        counters: &WalkCounters,
        failed_tasks: u64,
        pruned: u64,
        threads: u64,
        duration: Duration,
    ) -> Self {
        let progress = counters.progress(duration);
        Self {
            dirs: progress.dirs,
            files: progress.files,
            bytes: progress.bytes,
            errors: progress.errors + failed_tasks,
            pruned,
            threads,
            duration,
        }
    }
}
