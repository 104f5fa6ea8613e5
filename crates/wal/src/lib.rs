//! # WAL - Write-Ahead Log
//!
//! Provides crash-safe durability for the storage engine.
//!
//! Every mutation (`PUT` or `DELETE`) is serialized into a binary frame and
//! appended to the active WAL segment **before** the corresponding in-memory
//! update. On restart all segments are replayed in creation order to
//! reconstruct the memtable, guaranteeing that no acknowledged write is lost.
//!
//! ## Binary frame format
//!
//! ```text
//! [magic: u32 LE][key_len: u64 LE][key][value_len: u64 LE][value]
//! [ts_ms: u64 LE][op: u8][crc32: u32 LE]
//! ```
//!
//! `op` is 0 for PUT and 1 for DELETE (tombstone, written with an empty
//! value). The CRC32 covers every preceding byte of the frame, magic
//! included.
//!
//! ## Segments
//!
//! The log is a directory of `wal-<id>.wal` segment files. The active
//! segment rotates once it exceeds the configured byte threshold, and the
//! store rotates it explicitly at flush so that fully-flushed segments can
//! be garbage collected. A fresh segment is always started at open; the
//! writer never appends after a possibly-torn tail.
//!
//! ## Replay tolerance
//!
//! A truncated frame at the end of a segment is the signature of a clean
//! crash mid-append and is skipped silently. A corrupt frame (bad CRC, bad
//! magic, nonsense lengths) in the middle of a segment terminates that
//! segment with a warning; replay continues with the next segment. A
//! segment whose very first frame has a bad magic is treated as wholly
//! unreadable and is a hard [`WalError::Corruption`].

mod reader;
mod record;
mod writer;

pub use reader::{replay_dir, ReplaySummary};
pub use record::{Seq, WalRecord, MAGIC, OP_DELETE, OP_PUT};
pub use writer::{SegmentInfo, WalWriter};

use std::io;
use thiserror::Error;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The log contains data that cannot be interpreted.
    #[error("wal corruption: {0}")]
    Corruption(String),
}

#[cfg(test)]
mod tests;
