mod reader_tests;
mod writer_tests;

use crate::{TableMeta, TableWriter, TableWriterOptions};
use std::path::Path;

/// Builds a table from `(key, value, ts)` triples; `None` value = tombstone.
pub(crate) fn build_table(
    dir: &Path,
    level: u32,
    id: u64,
    records: &[(&[u8], Option<&[u8]>, u64)],
) -> TableMeta {
    let mut w = TableWriter::create(dir, level, id, TableWriterOptions::default()).unwrap();
    for (key, value, ts) in records {
        w.add(key, *value, *ts).unwrap();
    }
    w.finalize().unwrap()
}
