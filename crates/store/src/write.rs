//! Write path: `put`, `delete`, flush, and the timestamp oracle.
//!
//! Every mutation takes a timestamp under the clock lock, reaches the WAL
//! under the WAL lock, and is then applied to the memtable under the store
//! lock. When the memtable outgrows its threshold it is frozen and drained
//! to one or more new L0 SSTables.

use std::mem;

use sstable::{TableMeta, TableWriter, TableWriterOptions};
use tracing::info;
use wal::{Seq, WalRecord};

use crate::error::{Error, Result};
use crate::{now_ms, Store, StoreState};

/// Monotonic millisecond clock. Wall time normally advances it; a
/// same-millisecond collision (or a clock step backwards) bumps to the
/// previous value plus one.
pub(crate) struct TimestampOracle {
    last: u64,
}

impl TimestampOracle {
    pub(crate) fn starting_at(last: u64) -> Self {
        Self { last }
    }

    pub(crate) fn next(&mut self) -> u64 {
        self.last = now_ms().max(self.last + 1);
        self.last
    }
}

impl Store {
    /// Inserts or updates `key`, returning the WAL sequence of the write.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<Seq> {
        self.write_record(key, Some(value))
    }

    /// Writes a tombstone for `key`, returning the WAL sequence. The key
    /// reads as absent until compaction eventually purges the marker.
    pub fn delete(&self, key: &[u8]) -> Result<Seq> {
        self.write_record(key, None)
    }

    fn write_record(&self, key: &[u8], value: Option<&[u8]>) -> Result<Seq> {
        if key.is_empty() {
            return Err(Error::invalid_argument("key must not be empty"));
        }

        let ts = self.clock.lock().next();
        let record = match value {
            Some(value) => WalRecord::put(key.to_vec(), value.to_vec(), ts),
            None => WalRecord::tombstone(key.to_vec(), ts),
        };
        let seq = self.wal.lock().append(&record)?;

        let mut state = self.state.lock();
        self.apply_locked(&mut state, key, value, ts, seq)?;
        Ok(seq)
    }

    /// Applies one record to the memtable and flushes if it crossed the
    /// threshold. Caller holds the store lock.
    pub(crate) fn apply_locked(
        &self,
        state: &mut StoreState,
        key: &[u8],
        value: Option<&[u8]>,
        ts: u64,
        seq: Seq,
    ) -> Result<()> {
        match value {
            Some(value) => state.memtable.put(key.to_vec(), value.to_vec(), ts),
            None => state.memtable.delete(key.to_vec(), ts),
        }
        self.seq_state.observe(seq);

        if state.memtable.size_bytes() > self.config.memtable_max_bytes {
            self.flush_locked(state)?;
        }
        Ok(())
    }

    /// Forces the memtable out to disk. No-op when it is empty, so calling
    /// twice in a row is harmless.
    pub fn flush_memtable(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    /// The flush proper. Caller holds the store lock.
    ///
    /// Order matters for crash safety:
    /// 1. capture the contiguous applied-seq floor (everything at or below
    ///    it is in the current memtable);
    /// 2. sync and rotate the WAL, so new appends land in a fresh segment;
    /// 3. freeze the memtable and swap in an empty one;
    /// 4. drain the frozen table to new L0 SSTables and register them;
    /// 5. only then drop WAL segments wholly at or below the floor.
    ///
    /// A crash before step 5 leaves the old segments for replay; a crash
    /// inside step 4 leaves at worst orphaned tables for open to reclaim.
    pub(crate) fn flush_locked(&self, state: &mut StoreState) -> Result<()> {
        if state.memtable.is_empty() {
            return Ok(());
        }

        let floor = self.seq_state.contiguous();
        {
            let mut wal = self.wal.lock();
            wal.sync()?;
            wal.rotate()?;
        }

        let frozen = mem::take(&mut state.memtable);
        info!(
            entries = frozen.len(),
            bytes = frozen.size_bytes(),
            "flushing memtable"
        );

        let metas = self.write_l0_tables(&frozen)?;
        for meta in metas {
            self.catalog.add_sstable(0, meta)?;
        }

        self.wal.lock().remove_segments_through(floor)?;
        Ok(())
    }

    /// Writes the frozen memtable to one or more L0 tables, splitting at
    /// `sstable_max_bytes`.
    fn write_l0_tables(&self, frozen: &memtable::Memtable) -> Result<Vec<TableMeta>> {
        let opts = TableWriterOptions {
            bloom_fp_rate: self.config.bloom_false_positive_rate,
            ..TableWriterOptions::default()
        };

        let mut metas = Vec::new();
        let mut writer: Option<TableWriter> = None;
        for (key, entry) in frozen.items() {
            if writer.is_none() {
                let id = self.catalog.allocate_table_id();
                writer = Some(TableWriter::create(&self.sst_dir, 0, id, opts)?);
            }
            let w = writer.as_mut().expect("writer just ensured");
            w.add(key, entry.value.as_deref(), entry.ts)?;
            if w.data_size() >= self.config.sstable_max_bytes {
                metas.push(writer.take().expect("active writer").finalize()?);
            }
        }
        if let Some(w) = writer {
            metas.push(w.finalize()?);
        }
        Ok(metas)
    }
}
