//! Replay side of the segmented WAL.

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::record::{Seq, WalRecord, MAGIC, OP_DELETE, OP_PUT};
use crate::writer::SegmentInfo;
use crate::WalError;

/// Sanity cap on key/value lengths; anything larger is treated as a corrupt
/// frame rather than an allocation request.
const MAX_LEN: u64 = 64 * 1024 * 1024;

/// What replay learned from the log, used to seed the writer and the
/// segment GC floor.
#[derive(Debug)]
pub struct ReplaySummary {
    /// Sequence of the last replayed record (0 if the log was empty).
    pub last_seq: Seq,
    /// Greatest timestamp seen across all replayed records.
    pub max_ts: u64,
    /// Every segment present on disk, oldest first, with the last sequence
    /// replayed from it.
    pub segments: Vec<SegmentInfo>,
}

/// Replays every complete, CRC-valid frame from all segments under `dir`
/// in creation order, calling `apply` with the derived sequence number.
///
/// # Termination per segment
///
/// - **Clean EOF** -> next segment.
/// - **Truncated tail** (partial frame, crash mid-append) -> skipped
///   silently, next segment.
/// - **Corrupt frame mid-segment** (bad CRC, bad magic, absurd lengths,
///   unknown op) -> logged, rest of the segment abandoned, next segment.
/// - **Bad magic on a segment's first frame** -> the segment is wholly
///   unreadable: hard [`WalError::Corruption`].
pub fn replay_dir<F>(dir: &Path, mut apply: F) -> Result<ReplaySummary, WalError>
where
    F: FnMut(Seq, WalRecord),
{
    let mut summary = ReplaySummary {
        last_seq: 0,
        max_ts: 0,
        segments: Vec::new(),
    };
    if !dir.exists() {
        return Ok(summary);
    }

    let mut replayed = 0u64;
    for (id, path) in list_segments(dir)? {
        let file = File::open(&path)?;
        let mut rdr = BufReader::new(file);
        let mut frame = Vec::with_capacity(256);
        let mut first_frame = true;

        loop {
            match read_frame(&mut rdr, &mut frame)? {
                FrameOutcome::Eof => break,
                FrameOutcome::TornTail => {
                    debug!(segment = id, "torn frame at segment tail, skipping");
                    break;
                }
                FrameOutcome::Corrupt { reason, bad_magic } => {
                    if first_frame && bad_magic {
                        return Err(WalError::Corruption(format!(
                            "segment {} is unreadable: {}",
                            id, reason
                        )));
                    }
                    warn!(
                        segment = id,
                        reason, "corrupt wal frame, abandoning rest of segment"
                    );
                    break;
                }
                FrameOutcome::Record(rec) => {
                    first_frame = false;
                    summary.last_seq += 1;
                    summary.max_ts = summary.max_ts.max(rec.ts);
                    replayed += 1;
                    apply(summary.last_seq, rec);
                }
            }
        }

        summary.segments.push(SegmentInfo {
            id,
            path,
            last_seq: summary.last_seq,
        });
    }

    info!(
        records = replayed,
        segments = summary.segments.len(),
        "wal replay complete"
    );
    Ok(summary)
}

enum FrameOutcome {
    Record(WalRecord),
    /// Incomplete frame at end of segment (clean crash mid-append).
    TornTail,
    /// Structurally invalid frame.
    Corrupt { reason: String, bad_magic: bool },
    /// No more bytes.
    Eof,
}

/// Reads one frame, accumulating its raw bytes into `frame` so the CRC can
/// be verified over exactly what was read.
fn read_frame<R: Read>(r: &mut R, frame: &mut Vec<u8>) -> Result<FrameOutcome, WalError> {
    frame.clear();

    match read_bytes(r, 4, frame)? {
        0 => return Ok(FrameOutcome::Eof),
        n if n < 4 => return Ok(FrameOutcome::TornTail),
        _ => {}
    }
    let magic = LittleEndian::read_u32(&frame[0..4]);
    if magic != MAGIC {
        return Ok(FrameOutcome::Corrupt {
            reason: format!("bad magic {:#010x}", magic),
            bad_magic: true,
        });
    }

    if !read_full(r, 8, frame)? {
        return Ok(FrameOutcome::TornTail);
    }
    let key_len = LittleEndian::read_u64(&frame[4..12]);
    if key_len > MAX_LEN {
        return Ok(corrupt(format!("key_len {} exceeds cap", key_len)));
    }
    if !read_full(r, key_len as usize, frame)? {
        return Ok(FrameOutcome::TornTail);
    }

    let value_len_at = frame.len();
    if !read_full(r, 8, frame)? {
        return Ok(FrameOutcome::TornTail);
    }
    let value_len = LittleEndian::read_u64(&frame[value_len_at..value_len_at + 8]);
    if value_len > MAX_LEN {
        return Ok(corrupt(format!("value_len {} exceeds cap", value_len)));
    }
    if !read_full(r, value_len as usize, frame)? {
        return Ok(FrameOutcome::TornTail);
    }

    // ts (8) + op (1) + crc (4)
    if !read_full(r, 13, frame)? {
        return Ok(FrameOutcome::TornTail);
    }

    let payload_end = frame.len() - 4;
    let stored_crc = LittleEndian::read_u32(&frame[payload_end..]);
    let mut hasher = Crc32::new();
    hasher.update(&frame[..payload_end]);
    if hasher.finalize() != stored_crc {
        return Ok(corrupt("crc mismatch".to_string()));
    }

    let key_start = 12;
    let key_end = key_start + key_len as usize;
    let value_start = key_end + 8;
    let value_end = value_start + value_len as usize;
    let ts = LittleEndian::read_u64(&frame[value_end..value_end + 8]);
    let op = frame[value_end + 8];

    let record = match op {
        OP_PUT => WalRecord::put(frame[key_start..key_end].to_vec(), frame[value_start..value_end].to_vec(), ts),
        OP_DELETE => WalRecord::tombstone(frame[key_start..key_end].to_vec(), ts),
        other => return Ok(corrupt(format!("unknown op code {}", other))),
    };
    Ok(FrameOutcome::Record(record))
}

fn corrupt(reason: String) -> FrameOutcome {
    FrameOutcome::Corrupt {
        reason,
        bad_magic: false,
    }
}

/// Appends up to `n` bytes of `r` onto `frame`, returning how many arrived.
fn read_bytes<R: Read>(r: &mut R, n: usize, frame: &mut Vec<u8>) -> io::Result<usize> {
    let start = frame.len();
    frame.resize(start + n, 0);
    let mut filled = 0;
    while filled < n {
        let got = r.read(&mut frame[start + filled..])?;
        if got == 0 {
            break;
        }
        filled += got;
    }
    frame.truncate(start + filled);
    Ok(filled)
}

/// Like [`read_bytes`] but collapses any short read into `false`.
fn read_full<R: Read>(r: &mut R, n: usize, frame: &mut Vec<u8>) -> io::Result<bool> {
    Ok(read_bytes(r, n, frame)? == n)
}

/// Lists `wal-<id>.wal` files under `dir`, sorted by id (creation order).
fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>, WalError> {
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(id_str) = name.strip_prefix("wal-").and_then(|s| s.strip_suffix(".wal")) else {
            continue;
        };
        match id_str.parse::<u64>() {
            Ok(id) => segments.push((id, path)),
            Err(_) => warn!(file = name, "ignoring unparsable wal filename"),
        }
    }
    segments.sort_by_key(|(id, _)| *id);
    Ok(segments)
}
