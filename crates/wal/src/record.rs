//! WAL frame encoding.

use crc32fast::Hasher as Crc32;

/// Monotonically increasing WAL sequence number, assigned at append.
///
/// The sequence is not stored in the frame; replay re-derives it by counting
/// frames across segments in creation order.
pub type Seq = u64;

/// Frame magic: "LSM" plus a format version byte.
pub const MAGIC: u32 = 0x4C53_4D01;

/// Op code for an insert/update.
pub const OP_PUT: u8 = 0;
/// Op code for a delete (tombstone).
pub const OP_DELETE: u8 = 1;

/// A single logged mutation. `value == None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub ts: u64,
}

impl WalRecord {
    pub fn put(key: Vec<u8>, value: Vec<u8>, ts: u64) -> Self {
        Self {
            key,
            value: Some(value),
            ts,
        }
    }

    pub fn tombstone(key: Vec<u8>, ts: u64) -> Self {
        Self {
            key,
            value: None,
            ts,
        }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Serializes the full frame (including the trailing CRC) into `buf`,
    /// which must be empty on entry so the CRC covers exactly this frame.
    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        debug_assert!(buf.is_empty());

        let value = self.value.as_deref().unwrap_or(b"");
        let op = if self.value.is_some() { OP_PUT } else { OP_DELETE };

        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&(self.key.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
        buf.extend_from_slice(value);
        buf.extend_from_slice(&self.ts.to_le_bytes());
        buf.push(op);

        let mut hasher = Crc32::new();
        hasher.update(buf);
        let crc = hasher.finalize();
        buf.extend_from_slice(&crc.to_le_bytes());
    }
}
