//! Open-time housekeeping: temporary-file cleanup, orphan reclamation, and
//! verification that everything the manifest references is present.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::error::{Error, Result};

/// Reconciles the sstable directory with the catalog:
///
/// - `.tmp` files are leftovers of interrupted writes and are removed;
/// - published `.data`/`.meta` files the manifest does not reference are
///   orphans of a crash mid-compaction (outputs written, swap never
///   committed) and are removed;
/// - files the manifest references but which are missing are fatal: the
///   store cannot serve reads that would route to them.
pub(crate) fn clean_stale_files(sst_dir: &Path, catalog: &Catalog) -> Result<()> {
    let referenced: HashSet<PathBuf> = catalog
        .all_tables()
        .iter()
        .flat_map(|meta| [meta.data_path.clone(), meta.meta_path.clone()])
        .collect();

    for path in &referenced {
        if !path.exists() {
            return Err(Error::recovery(format!(
                "manifest references missing file {}",
                path.display()
            )));
        }
    }

    let mut removed_tmp = 0usize;
    let mut removed_orphans = 0usize;
    for entry in std::fs::read_dir(sst_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if name.ends_with(".tmp") {
            if std::fs::remove_file(&path).is_ok() {
                removed_tmp += 1;
            }
            continue;
        }

        let is_table_file = name.ends_with(".data") || name.ends_with(".meta");
        if is_table_file && !referenced.contains(&path) {
            warn!(file = name, "removing orphaned sstable file");
            if std::fs::remove_file(&path).is_ok() {
                removed_orphans += 1;
            }
        }
    }

    if removed_tmp + removed_orphans > 0 {
        info!(
            temporaries = removed_tmp,
            orphans = removed_orphans,
            "reclaimed stale files"
        );
    }
    Ok(())
}
