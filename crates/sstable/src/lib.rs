//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk storage files for the storage engine.
//!
//! When the in-memory [`memtable::Memtable`] exceeds its size threshold the
//! store flushes it to disk as an SSTable; compaction produces new SSTables
//! by merging old ones. SSTables are *write-once, read-many*: once
//! published they are never modified, only replaced.
//!
//! Each table is a pair of files:
//!
//! ## Data file (`sst-<level>-<id>.data`)
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ key_len (u64) | key | value_len (u64) | value                │
//! │ ts (u64) | op (u8)                                           │
//! │ ... repeated, keys strictly increasing ...                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ end sentinel: key_len = 0xFFFF_FFFF_FFFF_FFFF                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `op` is 0 for a live value and 1 for a tombstone; an empty value with
//! op=0 is a real (empty) value, not a delete.
//!
//! ## Meta sidecar (`sst-<level>-<id>.meta`)
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ magic (u32) | format_version (u32)                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │ bloom_len (u32)  | serialized bloom filter                   │
//! │ index_len (u32)  | serialized sparse index                   │
//! │ footer_len (u32) | footer: min_key, max_key, ts range,       │
//! │                    record count, data size                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ crc32 (u32) over the three length-prefixed sections          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Both files are written under `.tmp`
//! names, fsynced, and renamed into place, so a table is either fully
//! published or invisible.

mod format;
mod index;
mod merge;
mod meta;
mod reader;
mod writer;

pub use format::{END_OF_DATA, FORMAT_VERSION, META_MAGIC, OP_DELETE, OP_PUT};
pub use index::SparseIndex;
pub use merge::MergeIterator;
pub use meta::TableMeta;
pub use reader::{TableIter, TableReader};
pub use writer::{TableWriter, TableWriterOptions};

use std::io;
use thiserror::Error;

/// Errors produced by SSTable operations.
#[derive(Debug, Error)]
pub enum SSTableError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A structural problem in a data or meta file.
    #[error("sstable format error: {0}")]
    Format(String),

    /// Keys were handed to the writer out of sorted order.
    #[error("keys must be added in strictly increasing order: {0}")]
    OutOfOrder(String),
}

#[cfg(test)]
mod tests;
