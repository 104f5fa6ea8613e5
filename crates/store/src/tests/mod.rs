mod recovery_tests;

use crate::{Config, Store};
use std::path::Path;

/// A config sized for tests: small thresholds, per-write fsync.
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::new(dir);
    config.memtable_max_bytes = 1024 * 1024;
    config.sstable_max_bytes = 1024 * 1024;
    config.wal_file_rotate_bytes = 1024 * 1024;
    config
}

pub(crate) fn open_store(dir: &Path) -> Store {
    Store::open(test_config(dir)).unwrap()
}

/// Counts records with `key` across every table in the catalog.
pub(crate) fn count_records_for_key(store: &Store, key: &[u8]) -> usize {
    let mut hits = 0;
    for meta in store.catalog().all_tables() {
        let reader = sstable::TableReader::open(&meta).unwrap();
        if reader.get(key).unwrap().is_some() {
            hits += 1;
        }
    }
    hits
}

/// Counts `.data` files on disk under the store's sst directory.
pub(crate) fn count_data_files(dir: &Path) -> usize {
    std::fs::read_dir(dir.join("sst"))
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.path()
                        .extension()
                        .map(|ext| ext == "data")
                        .unwrap_or(false)
                })
                .count()
        })
        .unwrap_or(0)
}
