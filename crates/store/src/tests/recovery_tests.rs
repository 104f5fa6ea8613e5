use crate::tests::{open_store, test_config};
use crate::{Error, Store};
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

// --------------------- WAL replay ---------------------

#[test]
fn acknowledged_writes_survive_a_crash() -> Result<()> {
    // A put acknowledged with fsync-per-write, then a "crash"
    // (drop without flushing anything to SSTables).
    let dir = tempdir()?;
    {
        let store = open_store(dir.path());
        store.put(b"k", b"v")?;
    }

    let store = open_store(dir.path());
    assert_eq!(store.get(b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn replay_preserves_deletes_and_overwrites() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path());
        store.put(b"a", b"1")?;
        store.put(b"b", b"2")?;
        store.put(b"a", b"updated")?;
        store.delete(b"b")?;
    }

    let store = open_store(dir.path());
    assert_eq!(store.get(b"a")?, Some(b"updated".to_vec()));
    assert_eq!(store.get(b"b")?, None);
    Ok(())
}

#[test]
fn recovery_combines_wal_and_sstables() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path());
        store.put(b"flushed", b"in-sst")?;
        store.flush_memtable()?;
        store.put(b"pending", b"in-wal")?;
    }

    let store = open_store(dir.path());
    assert_eq!(store.get(b"flushed")?, Some(b"in-sst".to_vec()));
    assert_eq!(store.get(b"pending")?, Some(b"in-wal".to_vec()));
    Ok(())
}

#[test]
fn replayed_writes_keep_their_timestamps_ahead_of_new_ones() -> Result<()> {
    let dir = tempdir()?;
    let old_ts = {
        let store = open_store(dir.path());
        store.put(b"k", b"old")?;
        store.get_with_meta(b"k")?.unwrap().1
    };

    let store = open_store(dir.path());
    store.put(b"k", b"new")?;
    let (value, new_ts) = store.get_with_meta(b"k")?.unwrap();
    assert_eq!(value, Some(b"new".to_vec()));
    assert!(new_ts > old_ts, "clock must resume past replayed timestamps");
    Ok(())
}

#[test]
fn timestamps_survive_replay_for_conflict_resolution() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path());
        store.put(b"k", b"table-value")?;
        store.flush_memtable()?;
        store.put(b"k", b"wal-value")?;
    }

    // The replayed WAL record must beat the older flushed record.
    let store = open_store(dir.path());
    assert_eq!(store.get(b"k")?, Some(b"wal-value".to_vec()));
    Ok(())
}

// --------------------- Stale file cleanup ---------------------

#[test]
fn leftover_temporaries_are_reclaimed_at_open() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path());
        store.put(b"k", b"v")?;
        store.flush_memtable()?;
    }

    // Plant interrupted-write artifacts.
    let sst_dir = dir.path().join("sst");
    fs::write(sst_dir.join("sst-0-99.data.tmp"), b"partial")?;
    fs::write(sst_dir.join("sst-0-99.meta.tmp"), b"partial")?;

    let store = open_store(dir.path());
    assert_eq!(store.get(b"k")?, Some(b"v".to_vec()));
    assert!(!sst_dir.join("sst-0-99.data.tmp").exists());
    assert!(!sst_dir.join("sst-0-99.meta.tmp").exists());
    Ok(())
}

#[test]
fn orphaned_tables_are_reclaimed_at_open() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path());
        store.put(b"k", b"v")?;
        store.flush_memtable()?;
    }

    // A published table the manifest never learned about (crash between
    // finalize and the catalog swap).
    let sst_dir = dir.path().join("sst");
    fs::write(sst_dir.join("sst-1-77.data"), b"orphan")?;
    fs::write(sst_dir.join("sst-1-77.meta"), b"orphan")?;

    let store = open_store(dir.path());
    assert!(!sst_dir.join("sst-1-77.data").exists());
    assert!(!sst_dir.join("sst-1-77.meta").exists());
    assert_eq!(store.get(b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn missing_referenced_table_is_a_recovery_error() -> Result<()> {
    let dir = tempdir()?;
    let meta = {
        let store = open_store(dir.path());
        store.put(b"k", b"v")?;
        store.flush_memtable()?;
        store.catalog().list_level(0).remove(0)
    };

    fs::remove_file(&meta.data_path)?;

    assert!(matches!(
        Store::open(test_config(dir.path())),
        Err(Error::Recovery(_))
    ));
    Ok(())
}

// --------------------- WAL corruption at open ---------------------

#[test]
fn torn_wal_tail_is_recovered_through() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path());
        store.put(b"a", b"1")?;
        store.put(b"b", b"2")?;
    }

    // Truncate the newest WAL segment mid-frame.
    let wal_dir = dir.path().join("wal");
    let mut segments: Vec<_> = fs::read_dir(&wal_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    segments.sort();
    let last = segments.pop().unwrap();
    let len = fs::metadata(&last)?.len();
    fs::OpenOptions::new()
        .write(true)
        .open(&last)?
        .set_len(len - 3)?;

    let store = open_store(dir.path());
    assert_eq!(store.get(b"a")?, Some(b"1".to_vec()));
    // The torn record is gone, silently.
    assert_eq!(store.get(b"b")?, None);
    Ok(())
}

#[test]
fn unreadable_wal_segment_head_fails_open() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_store(dir.path());
        store.put(b"a", b"1")?;
    }

    let wal_dir = dir.path().join("wal");
    let segment = fs::read_dir(&wal_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .next()
        .unwrap();
    let mut bytes = fs::read(&segment)?;
    bytes[0..4].copy_from_slice(&[0, 0, 0, 0]);
    fs::write(&segment, &bytes)?;

    assert!(matches!(
        Store::open(test_config(dir.path())),
        Err(Error::WalCorruption(_))
    ));
    Ok(())
}
