use super::*;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn open_writer(dir: &Path) -> WalWriter {
    WalWriter::open(dir, 64 * 1024 * 1024, true, 0, Vec::new()).unwrap()
}

fn replay_all(dir: &Path) -> Result<(Vec<(Seq, WalRecord)>, ReplaySummary), WalError> {
    let mut recs = Vec::new();
    let summary = replay_dir(dir, |seq, rec| recs.push((seq, rec)))?;
    Ok((recs, summary))
}

fn wal_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".wal"))
        .collect();
    names.sort();
    names
}

// -------------------- Basic append & replay --------------------

#[test]
fn append_assigns_monotonic_seqs() {
    let dir = tempdir().unwrap();
    let mut w = open_writer(dir.path());

    assert_eq!(w.append(&WalRecord::put(b"a".to_vec(), b"1".to_vec(), 10)).unwrap(), 1);
    assert_eq!(w.append(&WalRecord::put(b"b".to_vec(), b"2".to_vec(), 11)).unwrap(), 2);
    assert_eq!(w.append(&WalRecord::tombstone(b"a".to_vec(), 12)).unwrap(), 3);
    assert_eq!(w.last_seq(), 3);
}

#[test]
fn write_and_replay_put_and_del() {
    let dir = tempdir().unwrap();
    {
        let mut w = open_writer(dir.path());
        w.append(&WalRecord::put(b"k".to_vec(), b"v1".to_vec(), 1)).unwrap();
        w.append(&WalRecord::put(b"k2".to_vec(), b"v2".to_vec(), 2)).unwrap();
        w.append(&WalRecord::tombstone(b"k".to_vec(), 3)).unwrap();
        w.close().unwrap();
    }

    let (recs, summary) = replay_all(dir.path()).unwrap();
    assert_eq!(
        recs,
        vec![
            (1, WalRecord::put(b"k".to_vec(), b"v1".to_vec(), 1)),
            (2, WalRecord::put(b"k2".to_vec(), b"v2".to_vec(), 2)),
            (3, WalRecord::tombstone(b"k".to_vec(), 3)),
        ]
    );
    assert_eq!(summary.last_seq, 3);
    assert_eq!(summary.max_ts, 3);
}

#[test]
fn empty_value_replays_as_put_not_tombstone() {
    let dir = tempdir().unwrap();
    {
        let mut w = open_writer(dir.path());
        w.append(&WalRecord::put(b"k".to_vec(), Vec::new(), 1)).unwrap();
    }

    let (recs, _) = replay_all(dir.path()).unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].1.value.as_deref(), Some(&b""[..]));
    assert!(!recs[0].1.is_tombstone());
}

#[test]
fn replay_of_missing_dir_is_empty() {
    let dir = tempdir().unwrap();
    let (recs, summary) = replay_all(&dir.path().join("nope")).unwrap();
    assert!(recs.is_empty());
    assert_eq!(summary.last_seq, 0);
}

// -------------------- Truncated tail tolerance --------------------

#[test]
fn truncated_tail_after_valid_records() {
    let dir = tempdir().unwrap();
    {
        let mut w = open_writer(dir.path());
        w.append(&WalRecord::put(b"a".to_vec(), b"1".to_vec(), 1)).unwrap();
        w.append(&WalRecord::put(b"b".to_vec(), b"2".to_vec(), 2)).unwrap();
    }

    // Chop bytes off the active segment to simulate a crash mid-append.
    let seg = dir.path().join(wal_files(dir.path()).pop().unwrap());
    let len = fs::metadata(&seg).unwrap().len();
    let f = fs::OpenOptions::new().write(true).open(&seg).unwrap();
    f.set_len(len - 5).unwrap();

    let (recs, _) = replay_all(dir.path()).unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].1.key, b"a".to_vec());
}

#[test]
fn tail_cut_inside_magic_is_tolerated() {
    let dir = tempdir().unwrap();
    {
        let mut w = open_writer(dir.path());
        w.append(&WalRecord::put(b"a".to_vec(), b"1".to_vec(), 1)).unwrap();
    }

    // Append 2 stray bytes: a partial magic of a never-finished frame.
    let seg = dir.path().join(wal_files(dir.path()).pop().unwrap());
    let mut f = fs::OpenOptions::new().append(true).open(&seg).unwrap();
    f.write_all(&[0x01, 0x4d]).unwrap();

    let (recs, _) = replay_all(dir.path()).unwrap();
    assert_eq!(recs.len(), 1);
}

// -------------------- Corruption handling --------------------

#[test]
fn crc_mismatch_mid_segment_terminates_that_segment() {
    let dir = tempdir().unwrap();
    {
        let mut w = open_writer(dir.path());
        w.append(&WalRecord::put(b"a".to_vec(), b"1".to_vec(), 1)).unwrap();
        w.append(&WalRecord::put(b"b".to_vec(), b"2".to_vec(), 2)).unwrap();
        w.append(&WalRecord::put(b"c".to_vec(), b"3".to_vec(), 3)).unwrap();
    }

    // Flip a byte inside the second record's value.
    let seg = dir.path().join(wal_files(dir.path()).pop().unwrap());
    let mut bytes = fs::read(&seg).unwrap();
    let frame_len = bytes.len() / 3;
    bytes[frame_len + frame_len / 2] ^= 0xff;
    fs::write(&seg, &bytes).unwrap();

    // First record survives; the rest of the segment is abandoned.
    let (recs, _) = replay_all(dir.path()).unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].1.key, b"a".to_vec());
}

#[test]
fn corruption_in_one_segment_does_not_stop_later_segments() {
    let dir = tempdir().unwrap();
    {
        let mut w = open_writer(dir.path());
        w.append(&WalRecord::put(b"a".to_vec(), b"1".to_vec(), 1)).unwrap();
        w.append(&WalRecord::put(b"b".to_vec(), b"2".to_vec(), 2)).unwrap();
        w.rotate().unwrap();
        w.append(&WalRecord::put(b"c".to_vec(), b"3".to_vec(), 3)).unwrap();
    }

    // Corrupt the tail record of the first (sealed) segment.
    let first = dir.path().join(wal_files(dir.path()).remove(0));
    let mut bytes = fs::read(&first).unwrap();
    let n = bytes.len();
    bytes[n - 1] ^= 0xff; // stored CRC byte
    fs::write(&first, &bytes).unwrap();

    let (recs, _) = replay_all(dir.path()).unwrap();
    let keys: Vec<&[u8]> = recs.iter().map(|(_, r)| r.key.as_slice()).collect();
    assert_eq!(keys, vec![&b"a"[..], &b"c"[..]]);
}

#[test]
fn unreadable_segment_head_is_a_hard_error() {
    let dir = tempdir().unwrap();
    {
        let mut w = open_writer(dir.path());
        w.append(&WalRecord::put(b"a".to_vec(), b"1".to_vec(), 1)).unwrap();
    }

    // Stomp the magic of the segment's first frame.
    let seg = dir.path().join(wal_files(dir.path()).pop().unwrap());
    let mut bytes = fs::read(&seg).unwrap();
    bytes[0..4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
    fs::write(&seg, &bytes).unwrap();

    let err = replay_all(dir.path()).unwrap_err();
    assert!(matches!(err, WalError::Corruption(_)));
}

// -------------------- Rotation & GC --------------------

#[test]
fn rotation_by_size_creates_new_segments() {
    let dir = tempdir().unwrap();
    // Tiny rotation threshold: every append rolls the segment.
    let mut w = WalWriter::open(dir.path(), 16, true, 0, Vec::new()).unwrap();
    for i in 0..3u64 {
        w.append(&WalRecord::put(vec![b'k', i as u8], b"v".to_vec(), i)).unwrap();
    }

    assert!(wal_files(dir.path()).len() >= 3);

    // All records survive across the segment boundaries.
    let (recs, summary) = replay_all(dir.path()).unwrap();
    assert_eq!(recs.len(), 3);
    assert_eq!(summary.segments.len(), wal_files(dir.path()).len());
}

#[test]
fn reopen_starts_a_fresh_segment_and_continues_seq() {
    let dir = tempdir().unwrap();
    {
        let mut w = open_writer(dir.path());
        w.append(&WalRecord::put(b"a".to_vec(), b"1".to_vec(), 1)).unwrap();
    }

    let (_, summary) = replay_all(dir.path()).unwrap();
    let mut w =
        WalWriter::open(dir.path(), 64 * 1024, true, summary.last_seq, summary.segments).unwrap();
    assert_eq!(w.append(&WalRecord::put(b"b".to_vec(), b"2".to_vec(), 2)).unwrap(), 2);
    assert_eq!(wal_files(dir.path()).len(), 2);
}

#[test]
fn gc_removes_only_fully_flushed_segments() {
    let dir = tempdir().unwrap();
    let mut w = open_writer(dir.path());
    w.append(&WalRecord::put(b"a".to_vec(), b"1".to_vec(), 1)).unwrap();
    w.rotate().unwrap(); // sealed segment holds seqs <= 1
    w.append(&WalRecord::put(b"b".to_vec(), b"2".to_vec(), 2)).unwrap();
    w.rotate().unwrap(); // sealed segment holds seqs <= 2

    // Floor 1: only the first sealed segment is removable.
    assert_eq!(w.remove_segments_through(1).unwrap(), 1);
    assert_eq!(w.remove_segments_through(1).unwrap(), 0);

    let (recs, _) = replay_all(dir.path()).unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].1.key, b"b".to_vec());
}
