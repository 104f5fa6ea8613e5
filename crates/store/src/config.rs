//! Tunable parameters for the storage engine.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Configuration for a store instance.
///
/// Construct with [`Config::new`] and override fields as needed:
///
/// ```rust,no_run
/// use store::Config;
///
/// let mut config = Config::new("/var/lib/mydb");
/// config.memtable_max_bytes = 4 * 1024 * 1024;
/// config.wal_flush_every_write = false;
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for all on-disk artifacts (`wal/`, `sst/`, `meta/`).
    pub data_dir: PathBuf,
    /// Memtable size that triggers a flush to a new L0 SSTable.
    pub memtable_max_bytes: usize,
    /// fsync after every WAL append (durable per write) vs. batched.
    pub wal_flush_every_write: bool,
    /// Rotate the active WAL segment once it exceeds this size.
    pub wal_file_rotate_bytes: u64,
    /// Target false positive rate for per-table bloom filters.
    pub bloom_false_positive_rate: f64,
    /// Split flush/compaction outputs at this data size.
    pub sstable_max_bytes: u64,
    /// Depth of the LSM tree.
    pub max_levels: usize,
    /// Tombstones older than this are dropped when compacting into the
    /// deepest level.
    pub tombstone_retention_seconds: u64,
    /// Bound of the async apply queue.
    pub apply_queue_max: usize,
    /// Timed store-lock acquire used by async writers when the apply queue
    /// is full.
    pub apply_lock_timeout_ms: u64,
    /// Schedule a background L0 -> L1 compaction once L0 holds this many
    /// tables (async store only; 0 disables the policy).
    pub l0_compaction_trigger: usize,
}

impl Config {
    /// A configuration with production defaults rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            memtable_max_bytes: 64 * 1024 * 1024,
            wal_flush_every_write: true,
            wal_file_rotate_bytes: 64 * 1024 * 1024,
            bloom_false_positive_rate: 0.01,
            sstable_max_bytes: 64 * 1024 * 1024,
            max_levels: 6,
            tombstone_retention_seconds: 86_400,
            apply_queue_max: 100_000,
            apply_lock_timeout_ms: 5,
            l0_compaction_trigger: 4,
        }
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.memtable_max_bytes == 0 {
            return Err(Error::invalid_argument("memtable_max_bytes must be > 0"));
        }
        if !(self.bloom_false_positive_rate > 0.0 && self.bloom_false_positive_rate < 1.0) {
            return Err(Error::invalid_argument(
                "bloom_false_positive_rate must be in (0, 1)",
            ));
        }
        if self.sstable_max_bytes == 0 {
            return Err(Error::invalid_argument("sstable_max_bytes must be > 0"));
        }
        if self.max_levels < 2 {
            return Err(Error::invalid_argument("max_levels must be at least 2"));
        }
        if self.apply_queue_max == 0 {
            return Err(Error::invalid_argument("apply_queue_max must be > 0"));
        }
        Ok(())
    }
}
