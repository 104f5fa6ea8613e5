//! Read path: point lookups and range scans.
//!
//! Point lookups probe the memtable first (freshest data, includes
//! tombstones), then L0 tables newest-first, then deeper levels. The first
//! match wins; a tombstone anywhere shadows older values below it. Range
//! scans merge every intersecting source and keep the record with the
//! greatest timestamp per key.

use std::collections::BTreeMap;

use memtable::{Key, Timestamp, Value};
use sstable::{TableMeta, TableReader};

use crate::error::{Error, Result};
use crate::Store;

impl Store {
    /// Returns the live value for `key`, or `None` if the key is absent or
    /// tombstoned.
    pub fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        Ok(self.get_with_meta(key)?.and_then(|(value, _)| value))
    }

    /// Like [`get`](Store::get) but exposes the stored state: `None` when
    /// the key was never written, `Some((None, ts))` for a tombstone, and
    /// `Some((Some(value), ts))` for a live record.
    pub fn get_with_meta(&self, key: &[u8]) -> Result<Option<(Option<Value>, Timestamp)>> {
        if key.is_empty() {
            return Ok(None);
        }

        {
            let state = self.state.lock();
            if let Some(entry) = state.memtable.get(key) {
                return Ok(Some((entry.value.clone(), entry.ts)));
            }
        }

        // L0 newest-first, then deeper levels; the catalog ordering makes
        // the first match the authoritative record.
        for level in 0..self.catalog.max_levels() {
            for meta in self.catalog.list_level(level) {
                if !meta.covers_key(key) {
                    continue;
                }
                let reader = self.open_reader(&meta)?;
                if !reader.may_contain(key) {
                    continue;
                }
                if let Some((value, ts)) = reader.get(key)? {
                    return Ok(Some((value, ts)));
                }
            }
        }

        Ok(None)
    }

    /// Ordered scan of live keys in `[lo, hi)`; `None` bounds are open.
    /// Tombstoned keys are filtered out and each returned pair carries the
    /// newest value across all sources.
    pub fn range(&self, lo: Option<&[u8]>, hi: Option<&[u8]>) -> Result<Vec<(Key, Value)>> {
        if let (Some(lo), Some(hi)) = (lo, hi) {
            if hi < lo {
                return Err(Error::invalid_argument("range hi must not sort below lo"));
            }
            if hi == lo {
                return Ok(Vec::new());
            }
        }

        // Winner per key: value, timestamp, and the source priority that
        // breaks timestamp ties (memtable = 0, then catalog scan order).
        let mut merged: BTreeMap<Key, (Option<Value>, Timestamp, usize)> = BTreeMap::new();
        let merge_entry =
            |merged: &mut BTreeMap<Key, (Option<Value>, Timestamp, usize)>,
             key: Key,
             value: Option<Value>,
             ts: Timestamp,
             priority: usize| {
                match merged.get(&key) {
                    Some((_, best_ts, best_priority))
                        if *best_ts > ts || (*best_ts == ts && *best_priority <= priority) => {}
                    _ => {
                        merged.insert(key, (value, ts, priority));
                    }
                }
            };

        {
            let state = self.state.lock();
            for (key, entry) in state.memtable.iter_range(lo, hi) {
                merge_entry(&mut merged, key.clone(), entry.value.clone(), entry.ts, 0);
            }
        }

        let mut priority = 1;
        for level in 0..self.catalog.max_levels() {
            for meta in self.catalog.list_level(level) {
                if meta.overlaps_range(lo, hi) {
                    let reader = self.open_reader(&meta)?;
                    let mut iter = reader.iter_range(lo, hi)?;
                    while let Some((key, value, ts)) = iter.next_record()? {
                        merge_entry(&mut merged, key, value, ts, priority);
                    }
                }
                priority += 1;
            }
        }

        Ok(merged
            .into_iter()
            .filter_map(|(key, (value, _, _))| value.map(|v| (key, v)))
            .collect())
    }

    /// Opens a reader for `meta`. A file deleted out from under us by a
    /// concurrent compaction swap surfaces as a transient error
    /// ([`Error::is_transient`]); retrying against the swapped catalog
    /// succeeds.
    fn open_reader(&self, meta: &TableMeta) -> Result<TableReader> {
        TableReader::open(meta).map_err(Error::from)
    }
}
