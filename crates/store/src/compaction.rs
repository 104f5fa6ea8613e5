//! Compaction: merge level L (plus the target level) into L+1.
//!
//! The merge streams from a k-way [`MergeIterator`], so memory use is
//! bounded by one record per input regardless of data volume. Output tables
//! split at the configured size and are published atomically; the catalog
//! swap is the only step that touches shared state, and the input files are
//! unlinked only after the swap commits.

use std::path::PathBuf;

use sstable::{MergeIterator, TableMeta, TableReader, TableWriter, TableWriterOptions};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::{now_ms, Config, Store};

/// Performs merges; owns no state beyond configuration, so the sync store
/// and the background worker share one instance.
#[derive(Debug)]
pub(crate) struct Compactor {
    config: Config,
    sst_dir: PathBuf,
}

impl Compactor {
    pub(crate) fn new(config: Config, sst_dir: PathBuf) -> Self {
        Self { config, sst_dir }
    }

    /// Merges `inputs` (ordered shallowest level first, newest table first,
    /// the order that resolves equal-timestamp ties the same way the read
    /// path does) into new tables at `target_level`.
    ///
    /// Last-writer-wins: only the greatest-timestamp record per key
    /// survives. Tombstones are dropped when the target is the deepest
    /// level and the tombstone has outlived the retention window; otherwise
    /// they are carried down. Returns the descriptors of the outputs,
    /// which the caller swaps into the catalog.
    pub(crate) fn compact(
        &self,
        inputs: &[TableMeta],
        target_level: u32,
        catalog: &Catalog,
    ) -> Result<Vec<TableMeta>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        info!(inputs = inputs.len(), target_level, "compaction started");

        let readers: Vec<TableReader> = inputs
            .iter()
            .map(|meta| TableReader::open(meta).map_err(|e| Error::compaction(e.to_string())))
            .collect::<Result<_>>()?;
        let iters = readers
            .iter()
            .map(|r| r.iter_range(None, None))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::compaction(e.to_string()))?;
        let mut merge =
            MergeIterator::new(iters).map_err(|e| Error::compaction(e.to_string()))?;

        let deepest = target_level as usize == self.config.max_levels - 1;
        let now = now_ms();
        let retention_ms = self.config.tombstone_retention_seconds.saturating_mul(1000);
        let opts = TableWriterOptions {
            bloom_fp_rate: self.config.bloom_false_positive_rate,
            ..TableWriterOptions::default()
        };

        let mut outputs = Vec::new();
        let mut writer: Option<TableWriter> = None;
        let result = loop {
            let next = match merge.next_entry() {
                Ok(next) => next,
                Err(e) => break Err(Error::compaction(e.to_string())),
            };
            let Some((key, value, ts)) = next else {
                break Ok(());
            };

            // Tombstone GC: at the deepest level there is nothing below
            // left to shadow once the retention window has passed.
            if value.is_none() && deepest && now.saturating_sub(ts) > retention_ms {
                debug!(ts, "dropping expired tombstone");
                continue;
            }

            if writer.is_none() {
                let id = catalog.allocate_table_id();
                match TableWriter::create(&self.sst_dir, target_level, id, opts) {
                    Ok(w) => writer = Some(w),
                    Err(e) => break Err(Error::compaction(e.to_string())),
                }
            }
            let w = writer.as_mut().expect("writer just ensured");
            if let Err(e) = w.add(&key, value.as_deref(), ts) {
                break Err(Error::compaction(e.to_string()));
            }
            if w.data_size() >= self.config.sstable_max_bytes {
                match writer.take().expect("active writer").finalize() {
                    Ok(meta) => outputs.push(meta),
                    Err(e) => break Err(Error::compaction(e.to_string())),
                }
            }
        };

        if let Err(e) = result {
            // Published outputs become orphans reclaimed at next open; the
            // in-flight table's temporaries go away now.
            if let Some(mut w) = writer {
                w.discard();
            }
            return Err(e);
        }

        if let Some(w) = writer {
            outputs.push(
                w.finalize()
                    .map_err(|e| Error::compaction(e.to_string()))?,
            );
        }

        info!(outputs = outputs.len(), target_level, "compaction merged");
        Ok(outputs)
    }
}

impl Store {
    /// Synchronously compacts `level` into `level + 1`. Compacting the
    /// deepest level is a logged no-op, as is an empty level.
    pub fn compact_level(&self, level: usize) -> Result<()> {
        let Some((inputs, target_level)) = self.plan_compaction(level) else {
            return Ok(());
        };
        let outputs = self.compactor.compact(&inputs, target_level, &self.catalog)?;
        self.apply_compaction(&inputs, outputs, target_level)
    }

    /// Chooses the input set for compacting `level`: all of `level` plus
    /// everything already at `level + 1`, so the target level stays
    /// non-overlapping. `None` when there is nothing to do.
    pub(crate) fn plan_compaction(&self, level: usize) -> Option<(Vec<TableMeta>, u32)> {
        if level + 1 >= self.config.max_levels {
            warn!(level, "cannot compact the deepest level");
            return None;
        }
        let mut inputs = self.catalog.list_level(level);
        if inputs.is_empty() {
            debug!(level, "no tables to compact");
            return None;
        }
        inputs.extend(self.catalog.list_level(level + 1));
        Some((inputs, (level + 1) as u32))
    }

    /// Commits a finished merge: swap the catalog under the store lock,
    /// then unlink the input files. Readers that captured a descriptor
    /// before the swap may observe file-not-found; they surface it as a
    /// transient error and retry against the new catalog.
    pub(crate) fn apply_compaction(
        &self,
        inputs: &[TableMeta],
        outputs: Vec<TableMeta>,
        target_level: u32,
    ) -> Result<()> {
        {
            let _state = self.state.lock();
            self.catalog
                .replace(inputs, outputs, target_level as usize)
                .map_err(|e| Error::compaction(e.to_string()))?;
        }

        for meta in inputs {
            for path in [&meta.data_path, &meta.meta_path] {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "failed to delete compacted input");
                }
            }
        }
        Ok(())
    }
}
