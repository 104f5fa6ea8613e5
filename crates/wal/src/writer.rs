//! Append side of the segmented WAL.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::record::{Seq, WalRecord};
use crate::WalError;

/// A closed (no longer written) WAL segment.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub id: u64,
    pub path: PathBuf,
    /// Sequence of the last record appended while this segment was active.
    /// Everything in the segment is at or below this seq.
    pub last_seq: Seq,
}

/// Returns the on-disk path of segment `id` under `dir`.
pub(crate) fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("wal-{:08}.wal", id))
}

/// Append-only writer over a directory of WAL segments.
///
/// Frames are serialized into a reusable scratch buffer and written with a
/// single `write_all` call. When `flush_every_write` is set, every append is
/// followed by `sync_all()` (fsync) so the record is durable before the call
/// returns.
pub struct WalWriter {
    dir: PathBuf,
    rotate_bytes: u64,
    flush_every_write: bool,
    file: File,
    segment_id: u64,
    segment_bytes: u64,
    /// Last sequence handed out by `append` (0 before the first append).
    last_seq: Seq,
    /// Closed segments, oldest first, eligible for GC once flushed.
    sealed: Vec<SegmentInfo>,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

impl WalWriter {
    /// Opens the log for appending, always starting a fresh segment after
    /// any recovered ones (appending to a possibly-torn tail would make the
    /// old tail look like mid-segment corruption on the next replay).
    ///
    /// `start_seq` is the last sequence observed by replay; appends continue
    /// from `start_seq + 1`. `recovered` lists the segments replay saw, so
    /// they become GC candidates once their contents are flushed.
    pub fn open(
        dir: &Path,
        rotate_bytes: u64,
        flush_every_write: bool,
        start_seq: Seq,
        recovered: Vec<SegmentInfo>,
    ) -> Result<Self, WalError> {
        std::fs::create_dir_all(dir)?;

        let segment_id = recovered.iter().map(|s| s.id).max().map_or(1, |id| id + 1);
        let file = Self::create_segment(dir, segment_id)?;
        debug!(segment_id, start_seq, "opened wal for append");

        Ok(Self {
            dir: dir.to_path_buf(),
            rotate_bytes,
            flush_every_write,
            file,
            segment_id,
            segment_bytes: 0,
            last_seq: start_seq,
            sealed: recovered,
            buf: Vec::with_capacity(256),
        })
    }

    fn create_segment(dir: &Path, id: u64) -> Result<File, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment_path(dir, id))?;
        Ok(file)
    }

    /// Serializes `record` and appends it to the active segment, returning
    /// the record's sequence number. Rotates afterwards if the segment has
    /// grown past the rotation threshold.
    pub fn append(&mut self, record: &WalRecord) -> Result<Seq, WalError> {
        self.buf.clear();
        record.encode_into(&mut self.buf);

        self.file.write_all(&self.buf)?;
        if self.flush_every_write {
            self.file.sync_all()?;
        }

        self.last_seq += 1;
        self.segment_bytes += self.buf.len() as u64;

        if self.segment_bytes > self.rotate_bytes {
            self.rotate()?;
        }

        Ok(self.last_seq)
    }

    /// Forces buffered data to disk. Idempotent.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Seals the active segment (fsyncing it) and starts a new empty one.
    pub fn rotate(&mut self) -> Result<(), WalError> {
        self.file.sync_all()?;

        let sealed_id = self.segment_id;
        self.sealed.push(SegmentInfo {
            id: sealed_id,
            path: segment_path(&self.dir, sealed_id),
            last_seq: self.last_seq,
        });

        self.segment_id += 1;
        self.file = Self::create_segment(&self.dir, self.segment_id)?;
        self.segment_bytes = 0;
        debug!(
            sealed = sealed_id,
            active = self.segment_id,
            "rotated wal segment"
        );
        Ok(())
    }

    /// Deletes sealed segments whose every record has sequence <= `floor`,
    /// i.e. segments whose contents are durably applied and flushed.
    /// Returns the number of segments removed.
    pub fn remove_segments_through(&mut self, floor: Seq) -> Result<usize, WalError> {
        let mut removed = 0;
        self.sealed.retain(|seg| {
            if seg.last_seq > floor {
                return true;
            }
            match std::fs::remove_file(&seg.path) {
                Ok(()) => {
                    removed += 1;
                    false
                }
                Err(e) => {
                    warn!(path = %seg.path.display(), error = %e, "failed to delete wal segment");
                    true
                }
            }
        });
        if removed > 0 {
            info!(removed, floor, "garbage collected wal segments");
        }
        Ok(removed)
    }

    /// The last sequence assigned by `append` (0 if nothing was appended).
    #[must_use]
    pub fn last_seq(&self) -> Seq {
        self.last_seq
    }

    /// Id of the currently active segment.
    #[must_use]
    pub fn active_segment_id(&self) -> u64 {
        self.segment_id
    }

    /// Syncs and releases the log. Further appends would reopen a file
    /// handle error; the store drops the writer after closing.
    pub fn close(&mut self) -> Result<(), WalError> {
        self.sync()
    }
}
