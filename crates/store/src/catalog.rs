//! # Catalog - per-level SSTable registry
//!
//! Tracks which SSTables belong to which level so the store can reconstruct
//! its state after a restart.
//!
//! ## Manifest format
//!
//! The catalog persists as a JSON document at `meta/manifest`:
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "next_table_id": 7,
//!   "levels": [
//!     [ { "id": 5, "level": 0, "data_path": "...", "min_key": "61", ... } ],
//!     [ { "id": 6, "level": 1, ... } ]
//!   ]
//! }
//! ```
//!
//! Level 0 lists tables newest-first (flush order); deeper levels are kept
//! sorted by `min_key` and are non-overlapping after compaction. Binary keys
//! are hex-encoded strings.
//!
//! ## Crash safety
//!
//! Every mutation is applied in memory under the catalog lock and then
//! written to `manifest.tmp`, fsynced, and renamed over the live manifest;
//! the previous manifest is first renamed to `manifest.bak`. A mutation
//! therefore either fully commits or leaves the prior manifest (or its
//! backup) intact, and open falls back to the backup when the live file is
//! missing or unreadable.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use sstable::TableMeta;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Name of the live manifest inside the meta directory.
pub(crate) const MANIFEST_FILENAME: &str = "manifest";
/// Previous committed manifest, kept as a fallback.
const MANIFEST_BAK_FILENAME: &str = "manifest.bak";
/// Scratch file for atomic replacement.
const MANIFEST_TMP_FILENAME: &str = "manifest.tmp";

const MANIFEST_FORMAT_VERSION: u32 = 1;

/// On-disk shape of the manifest.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestDoc {
    format_version: u32,
    next_table_id: u64,
    levels: Vec<Vec<TableMeta>>,
}

#[derive(Debug)]
struct CatalogInner {
    levels: Vec<Vec<TableMeta>>,
    next_table_id: u64,
}

/// Registry of SSTables per level with atomic, durable updates.
#[derive(Debug)]
pub struct Catalog {
    manifest_path: PathBuf,
    backup_path: PathBuf,
    tmp_path: PathBuf,
    max_levels: usize,
    inner: Mutex<CatalogInner>,
}

impl Catalog {
    /// Loads the catalog from `meta_dir`, falling back to the backup
    /// manifest, or starts empty when neither exists.
    pub fn open(meta_dir: &Path, max_levels: usize) -> Result<Self> {
        fs::create_dir_all(meta_dir)?;
        let manifest_path = meta_dir.join(MANIFEST_FILENAME);
        let backup_path = meta_dir.join(MANIFEST_BAK_FILENAME);
        let tmp_path = meta_dir.join(MANIFEST_TMP_FILENAME);

        // A leftover tmp file is an interrupted save; the live manifest (or
        // its backup) is authoritative.
        if tmp_path.exists() {
            warn!(path = %tmp_path.display(), "removing interrupted manifest write");
            let _ = fs::remove_file(&tmp_path);
        }

        let doc = match Self::load_doc(&manifest_path) {
            Ok(Some(doc)) => Some(doc),
            Ok(None) => match Self::load_doc(&backup_path) {
                Ok(found) => {
                    if found.is_some() {
                        warn!("live manifest missing, recovered from backup");
                    }
                    found
                }
                Err(e) => return Err(e),
            },
            Err(live_err) => match Self::load_doc(&backup_path) {
                Ok(Some(doc)) => {
                    warn!(error = %live_err, "live manifest unreadable, recovered from backup");
                    Some(doc)
                }
                _ => return Err(live_err),
            },
        };

        let inner = match doc {
            Some(doc) => {
                let mut levels = doc.levels;
                if levels.iter().skip(max_levels).any(|l| !l.is_empty()) {
                    return Err(Error::recovery(format!(
                        "manifest has populated levels beyond max_levels {}",
                        max_levels
                    )));
                }
                levels.resize_with(max_levels, Vec::new);
                CatalogInner {
                    levels,
                    next_table_id: doc.next_table_id,
                }
            }
            None => {
                info!("no existing manifest, starting fresh");
                CatalogInner {
                    levels: vec![Vec::new(); max_levels],
                    next_table_id: 1,
                }
            }
        };

        Ok(Self {
            manifest_path,
            backup_path,
            tmp_path,
            max_levels,
            inner: Mutex::new(inner),
        })
    }

    /// Reads and parses a manifest file. `Ok(None)` when it does not exist.
    fn load_doc(path: &Path) -> Result<Option<ManifestDoc>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::recovery(format!("cannot read manifest: {}", e))),
        };
        let doc: ManifestDoc = serde_json::from_slice(&bytes)
            .map_err(|e| Error::recovery(format!("cannot parse manifest: {}", e)))?;
        if doc.format_version != MANIFEST_FORMAT_VERSION {
            return Err(Error::recovery(format!(
                "unsupported manifest format version {}",
                doc.format_version
            )));
        }
        Ok(Some(doc))
    }

    /// Hands out the next monotonic table identity. The allocation is
    /// persisted with the next manifest save; ids skipped by a crash are
    /// simply never reused for a referenced table.
    pub fn allocate_table_id(&self) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_table_id;
        inner.next_table_id += 1;
        id
    }

    /// Number of configured levels.
    #[must_use]
    pub fn max_levels(&self) -> usize {
        self.max_levels
    }

    /// A copy of the descriptor list at `level` (empty for out-of-range
    /// levels). L0 is ordered newest-first; deeper levels by min key.
    #[must_use]
    pub fn list_level(&self, level: usize) -> Vec<TableMeta> {
        let inner = self.inner.lock();
        inner.levels.get(level).cloned().unwrap_or_default()
    }

    /// Number of tables at `level`.
    #[must_use]
    pub fn level_len(&self, level: usize) -> usize {
        let inner = self.inner.lock();
        inner.levels.get(level).map_or(0, Vec::len)
    }

    /// Every descriptor across all levels, shallowest first.
    #[must_use]
    pub fn all_tables(&self) -> Vec<TableMeta> {
        let inner = self.inner.lock();
        inner.levels.iter().flatten().cloned().collect()
    }

    /// Registers a table at `level` and persists the manifest.
    pub fn add_sstable(&self, level: usize, meta: TableMeta) -> Result<()> {
        if level >= self.max_levels {
            return Err(Error::invalid_argument(format!(
                "level {} out of range (max_levels {})",
                level, self.max_levels
            )));
        }
        let mut inner = self.inner.lock();
        if level == 0 {
            // Newest first: the read path scans L0 front to back.
            inner.levels[0].insert(0, meta);
        } else {
            inner.levels[level].push(meta);
            inner.levels[level].sort_by(|a, b| a.min_key.cmp(&b.min_key));
        }
        self.save_locked(&inner)
    }

    /// Drops the given tables (matched by id) and persists the manifest.
    pub fn remove_sstables(&self, metas: &[TableMeta]) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::remove_locked(&mut inner, metas);
        self.save_locked(&inner)
    }

    /// The compaction swap: removes `inputs` and registers `outputs` at
    /// `target_level` in one persisted mutation.
    pub fn replace(
        &self,
        inputs: &[TableMeta],
        outputs: Vec<TableMeta>,
        target_level: usize,
    ) -> Result<()> {
        if target_level >= self.max_levels {
            return Err(Error::invalid_argument(format!(
                "level {} out of range (max_levels {})",
                target_level, self.max_levels
            )));
        }
        let mut inner = self.inner.lock();
        Self::remove_locked(&mut inner, inputs);
        inner.levels[target_level].extend(outputs);
        inner.levels[target_level].sort_by(|a, b| a.min_key.cmp(&b.min_key));
        self.save_locked(&inner)
    }

    fn remove_locked(inner: &mut CatalogInner, metas: &[TableMeta]) {
        let ids: Vec<u64> = metas.iter().map(|m| m.id).collect();
        for level in &mut inner.levels {
            level.retain(|m| !ids.contains(&m.id));
        }
    }

    /// Serializes the in-memory state and atomically replaces the live
    /// manifest, keeping the previous one as `.bak`.
    fn save_locked(&self, inner: &CatalogInner) -> Result<()> {
        let doc = ManifestDoc {
            format_version: MANIFEST_FORMAT_VERSION,
            next_table_id: inner.next_table_id,
            levels: inner.levels.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)
            .map_err(|e| Error::recovery(format!("cannot serialize manifest: {}", e)))?;

        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.tmp_path)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }

        if self.manifest_path.exists() {
            fs::rename(&self.manifest_path, &self.backup_path)?;
        }
        fs::rename(&self.tmp_path, &self.manifest_path)?;

        // Make the rename durable before the caller acts on it.
        if let Some(parent) = self.manifest_path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        debug!(tables = doc.levels.iter().map(Vec::len).sum::<usize>(), "manifest saved");
        Ok(())
    }
}
