//! Run statistics for archive creation and extraction.
//!
//! Worker threads bump shared atomics; the totals are snapshotted into plain
//! structs when the run completes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Totals of a successful [`archive`](crate::workers::archive) run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Directories listed, roots included.
    pub directories: u64,
    /// Files fully streamed into the archive.
    pub files: u64,
    /// Files that vanished between listing and opening.
    pub skipped: u64,
    /// Blocks written to the output.
    pub blocks: u64,
    /// File content bytes read.
    pub bytes_read: u64,
    /// Encoded bytes written to the output.
    pub bytes_written: u64,
    pub elapsed: Duration,
}

/// Totals of a successful [`extract`](crate::extract::extract) run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub files: u64,
    pub blocks: u64,
    /// File content bytes written.
    pub bytes: u64,
    /// Most files that were open for writing at the same time.
    pub max_open_files: usize,
    pub elapsed: Duration,
}

/// Creation-side counters, shared by reference across the worker pools.
#[derive(Debug, Default)]
pub(crate) struct ArchiveCounters {
    pub directories: AtomicU64,
    pub files: AtomicU64,
    pub skipped: AtomicU64,
    pub bytes_read: AtomicU64,
}

impl ArchiveCounters {
    pub fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, blocks: u64, bytes_written: u64, elapsed: Duration) -> ArchiveStats {
        ArchiveStats {
            directories: self.directories.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            blocks,
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written,
            elapsed,
        }
    }
}

/// Extraction-side counters, bumped by the per-file writer threads.
#[derive(Debug, Default)]
pub(crate) struct ExtractCounters {
    pub files: AtomicU64,
    pub bytes: AtomicU64,
}

impl ExtractCounters {
    pub fn snapshot(&self, blocks: u64, max_open_files: usize, elapsed: Duration) -> ExtractStats {
        ExtractStats {
            files: self.files.load(Ordering::Relaxed),
            blocks,
            bytes: self.bytes.load(Ordering::Relaxed),
            max_open_files,
            elapsed,
        }
    }
}

/// Throughput in MiB/s, zero for instant runs.
pub fn mib_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / (1024.0 * 1024.0)) / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_counters() {
        let c = ArchiveCounters::default();
        ArchiveCounters::bump(&c.files, 2);
        ArchiveCounters::bump(&c.bytes_read, 10);
        let s = c.snapshot(6, 40, Duration::from_secs(1));
        assert_eq!((s.files, s.bytes_read, s.blocks, s.bytes_written), (2, 10, 6, 40));
        assert_eq!(s.skipped, 0);
    }

    #[test]
    fn throughput() {
        assert_eq!(mib_per_sec(1024 * 1024, Duration::from_secs(2)), 0.5);
        assert_eq!(mib_per_sec(5, Duration::ZERO), 0.0);
    }
}
