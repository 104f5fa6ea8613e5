//! # Store - LSM-tree storage engine
//!
//! The central orchestrator that ties the [`wal`], [`memtable`], and
//! [`sstable`] crates into a complete persistent ordered key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌────────────────────────────────────────────────────┐
//! │                     STORE                          │
//! │                                                    │
//! │ write.rs → timestamp → WAL append → memtable       │
//! │              |                                     │
//! │              |  (memtable_max_bytes exceeded?)     │
//! │              v            yes                      │
//! │           flush → new L0 SSTable → catalog add     │
//! │                                                    │
//! │ compaction.rs → merge Ln + Ln+1 → swap catalog     │
//! │                                                    │
//! │ read.rs → memtable → L0 (newest first) → L1..Ln    │
//! │            (first match wins, tombstones shadow)   │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module responsibilities
//!
//! | Module          | Purpose                                            |
//! |-----------------|----------------------------------------------------|
//! | `lib.rs`        | `Store` struct, open/recovery entry, accessors     |
//! | `config`        | Tunables and validation                            |
//! | `error`         | Error taxonomy (`WalCorruption`, `Recovery`, ...)  |
//! | `catalog`       | Per-level table registry, atomic manifest          |
//! | `write`         | `put`/`delete`, flush, WAL segment GC              |
//! | `read`          | `get`/`get_with_meta`/`range`                      |
//! | `compaction`    | k-way merge, tombstone GC, catalog swap            |
//! | `recovery`      | Stale-file cleanup, referenced-file verification   |
//! | `async_store`   | WAL-first writes, background apply & compaction    |
//! | `seq`           | Contiguous applied-sequence watermark              |
//!
//! ## Crash safety
//!
//! Every write reaches the WAL before the memtable; flush rotates to a new
//! WAL segment before the SSTable is published and only garbage collects
//! segments whose records are both applied and flushed. SSTables and the
//! manifest are published by temp-file + fsync + rename. Recovery replays
//! every complete WAL frame into a fresh memtable.
//!
//! ## Example
//!
//! ```rust,no_run
//! use store::{Config, Store};
//!
//! # fn main() -> store::Result<()> {
//! let store = Store::open(Config::new("./data"))?;
//! store.put(b"key", b"value")?;
//! assert_eq!(store.get(b"key")?, Some(b"value".to_vec()));
//! store.delete(b"key")?;
//! store.close()?;
//! # Ok(())
//! # }
//! ```

mod async_store;
mod catalog;
mod compaction;
mod config;
mod error;
mod read;
mod recovery;
mod seq;
mod write;

pub use async_store::{AsyncStore, CompactionJob, JobId, JobStatus};
pub use catalog::Catalog;
pub use config::Config;
pub use error::{Error, Result};
pub use memtable::{Key, Timestamp, Value};
pub use wal::Seq;

use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use compaction::Compactor;
use memtable::Memtable;
use seq::SeqState;
use tracing::info;
use wal::WalWriter;
use write::TimestampOracle;

/// The synchronous storage engine.
///
/// Thread-safe: readers snapshot the memtable and catalog under short lock
/// holds, writers serialize on the WAL and store locks, and all table I/O
/// happens outside the store lock (except the sync flush, which the async
/// store exists to take off the write path).
pub struct Store {
    config: Config,
    sst_dir: PathBuf,
    /// Store lock: guards the active memtable.
    state: Mutex<StoreState>,
    /// WAL lock: serializes appends, rotation, and segment GC.
    wal: Mutex<WalWriter>,
    /// Timestamp lock: the monotonic ms clock, isolated from the store lock.
    clock: Mutex<TimestampOracle>,
    /// Seq lock: the contiguous applied watermark plus its condvar.
    seq_state: SeqState,
    catalog: Catalog,
    compactor: Compactor,
}

pub(crate) struct StoreState {
    pub(crate) memtable: Memtable,
}

impl Store {
    /// Opens (or creates) a store rooted at `config.data_dir`, running full
    /// recovery: catalog load with backup fallback, stale-file cleanup,
    /// and WAL replay into a fresh memtable.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let wal_dir = config.data_dir.join("wal");
        let sst_dir = config.data_dir.join("sst");
        let meta_dir = config.data_dir.join("meta");
        for dir in [&wal_dir, &sst_dir, &meta_dir] {
            std::fs::create_dir_all(dir)?;
        }

        let catalog = Catalog::open(&meta_dir, config.max_levels)?;
        recovery::clean_stale_files(&sst_dir, &catalog)?;

        let mut memtable = Memtable::new();
        let summary = wal::replay_dir(&wal_dir, |_seq, rec| match rec.value {
            Some(value) => memtable.put(rec.key, value, rec.ts),
            None => memtable.delete(rec.key, rec.ts),
        })?;

        let wal = WalWriter::open(
            &wal_dir,
            config.wal_file_rotate_bytes,
            config.wal_flush_every_write,
            summary.last_seq,
            summary.segments,
        )?;

        info!(
            data_dir = %config.data_dir.display(),
            replayed = summary.last_seq,
            memtable_entries = memtable.len(),
            tables = catalog.all_tables().len(),
            "opened store"
        );

        Ok(Self {
            compactor: Compactor::new(config.clone(), sst_dir.clone()),
            sst_dir,
            state: Mutex::new(StoreState { memtable }),
            wal: Mutex::new(wal),
            clock: Mutex::new(TimestampOracle::starting_at(summary.max_ts)),
            seq_state: SeqState::new(summary.last_seq),
            catalog,
            config,
        })
    }

    /// The configuration this store was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The catalog of live SSTables.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The `last_applied_seq` watermark: every write with a sequence at or
    /// below it is visible to reads.
    #[must_use]
    pub fn last_applied_seq(&self) -> Seq {
        self.seq_state.contiguous()
    }

    /// Syncs and closes the WAL. Best-effort: resources are released
    /// regardless, and the first error encountered is returned.
    pub fn close(&self) -> Result<()> {
        info!("closing store");
        self.wal.lock().close()?;
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Data is safe in the WAL either way; this just narrows the window
        // where batched appends are not yet on disk.
        let _ = self.wal.lock().sync();
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("data_dir", &self.config.data_dir)
            .field("memtable_size", &self.state.lock().memtable.size_bytes())
            .field("last_applied_seq", &self.seq_state.contiguous())
            .finish()
    }
}

/// Wall-clock milliseconds since the epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests;
