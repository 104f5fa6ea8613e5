//! Sparse block index: sampled first-keys and their data-file offsets.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;

use crate::format::MAX_KEY_BYTES;
use crate::SSTableError;

/// Block-offset lookup built from the first key of every block.
///
/// The writer samples one entry per block (every Nth record); the reader
/// uses [`find_block_offset`](SparseIndex::find_block_offset) to bound a
/// point lookup to a single block's worth of linear scanning.
#[derive(Debug, Default)]
pub struct SparseIndex {
    /// `(first_key, data_offset)` pairs, ascending by key.
    entries: Vec<(Vec<u8>, u64)>,
}

impl SparseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sampled entry. Keys must arrive in ascending order (the
    /// writer samples from an already-ordered stream).
    pub fn push(&mut self, key: Vec<u8>, offset: u64) {
        debug_assert!(self.entries.last().map_or(true, |(k, _)| *k < key));
        self.entries.push((key, offset));
    }

    /// Returns the data-file offset of the block that may hold `key`: the
    /// offset recorded for the greatest sampled key `<= key`, or the first
    /// block's offset when `key` sorts before every sample.
    ///
    /// Range pruning (`key` outside `[min_key, max_key]`) is the reader's
    /// job; the index only picks a starting block.
    #[must_use]
    pub fn find_block_offset(&self, key: &[u8]) -> u64 {
        let idx = self
            .entries
            .partition_point(|(sample, _)| sample.as_slice() <= key);
        if idx == 0 {
            self.entries.first().map_or(0, |(_, off)| *off)
        } else {
            self.entries[idx - 1].1
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes as `[count: u32]` then `[key_len: u32][key][offset: u64]`
    /// per entry, little-endian.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (key, offset) in &self.entries {
            buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
            buf.extend_from_slice(key);
            buf.extend_from_slice(&offset.to_le_bytes());
        }
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, SSTableError> {
        let count = r.read_u32::<LittleEndian>()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key_len = r.read_u32::<LittleEndian>()? as u64;
            if key_len > MAX_KEY_BYTES {
                return Err(SSTableError::Format(format!(
                    "index key_len {} exceeds maximum {}",
                    key_len, MAX_KEY_BYTES
                )));
            }
            let mut key = vec![0u8; key_len as usize];
            r.read_exact(&mut key)?;
            let offset = r.read_u64::<LittleEndian>()?;
            entries.push((key, offset));
        }
        Ok(Self { entries })
    }
}
