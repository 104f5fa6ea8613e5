use crate::tests::build_table;
use crate::{SSTableError, TableWriter, TableWriterOptions};
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

// -------------------- Publish & descriptor --------------------

#[test]
fn finalize_publishes_both_files_and_returns_descriptor() -> Result<()> {
    let dir = tempdir()?;
    let meta = build_table(
        dir.path(),
        0,
        1,
        &[
            (b"a", Some(b"apple"), 10),
            (b"b", Some(b"banana"), 11),
            (b"c", Some(b""), 12),
            (b"d", None, 13),
        ],
    );

    assert!(meta.data_path.exists());
    assert!(meta.meta_path.exists());
    assert_eq!(meta.id, 1);
    assert_eq!(meta.level, 0);
    assert_eq!(meta.min_key, b"a".to_vec());
    assert_eq!(meta.max_key, b"d".to_vec());
    assert_eq!(meta.count, 4);
    assert_eq!(meta.ts_min, 10);
    assert_eq!(meta.ts_max, 13);
    assert_eq!(meta.data_size, fs::metadata(&meta.data_path)?.len() - 8); // minus sentinel
    Ok(())
}

#[test]
fn no_tmp_files_remain_after_finalize() -> Result<()> {
    let dir = tempdir()?;
    build_table(dir.path(), 0, 1, &[(b"k", Some(b"v"), 1)]);

    let leftovers: Vec<_> = fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "leftover temporaries: {:?}", leftovers);
    Ok(())
}

#[test]
fn discard_removes_temporaries() -> Result<()> {
    let dir = tempdir()?;
    let mut w = TableWriter::create(dir.path(), 0, 1, TableWriterOptions::default())?;
    w.add(b"k", Some(b"v"), 1)?;
    w.discard();

    assert_eq!(fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

// -------------------- Ordering enforcement --------------------

#[test]
fn out_of_order_add_is_rejected() {
    let dir = tempdir().unwrap();
    let mut w = TableWriter::create(dir.path(), 0, 1, TableWriterOptions::default()).unwrap();
    w.add(b"b", Some(b"1"), 1).unwrap();

    let err = w.add(b"a", Some(b"2"), 2).unwrap_err();
    assert!(matches!(err, SSTableError::OutOfOrder(_)));
}

#[test]
fn duplicate_key_is_rejected() {
    let dir = tempdir().unwrap();
    let mut w = TableWriter::create(dir.path(), 0, 1, TableWriterOptions::default()).unwrap();
    w.add(b"a", Some(b"1"), 1).unwrap();

    let err = w.add(b"a", Some(b"2"), 2).unwrap_err();
    assert!(matches!(err, SSTableError::OutOfOrder(_)));
}

// -------------------- Edge cases --------------------

#[test]
fn finalizing_an_empty_table_fails() {
    let dir = tempdir().unwrap();
    let w = TableWriter::create(dir.path(), 0, 1, TableWriterOptions::default()).unwrap();
    assert!(matches!(w.finalize(), Err(SSTableError::Format(_))));
}

#[test]
fn data_size_tracks_written_records() -> Result<()> {
    let dir = tempdir()?;
    let mut w = TableWriter::create(dir.path(), 0, 1, TableWriterOptions::default())?;
    assert_eq!(w.data_size(), 0);

    w.add(b"key", Some(b"value"), 1)?;
    // 8 + 3 + 8 + 5 + 8 + 1
    assert_eq!(w.data_size(), 33);

    w.add(b"key2", None, 2)?;
    assert_eq!(w.data_size(), 33 + 8 + 4 + 8 + 0 + 8 + 1);
    Ok(())
}
