//! On-disk framing shared by the writer and reader.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::SSTableError;

/// Magic at the head of every meta sidecar file.
pub const META_MAGIC: u32 = 0x4C53_4D02;

/// Current meta sidecar format version.
pub const FORMAT_VERSION: u32 = 1;

/// Sentinel `key_len` terminating the data section.
pub const END_OF_DATA: u64 = u64::MAX;

/// Op code for a live value.
pub const OP_PUT: u8 = 0;
/// Op code for a tombstone.
pub const OP_DELETE: u8 = 1;

/// Largest key the reader will allocate for. Anything bigger is corruption.
pub(crate) const MAX_KEY_BYTES: u64 = 64 * 1024;
/// Largest value the reader will allocate for. Anything bigger is corruption.
pub(crate) const MAX_VALUE_BYTES: u64 = 64 * 1024 * 1024;

/// One decoded data record: key, optional value (None = tombstone), timestamp.
pub(crate) type Record = (Vec<u8>, Option<Vec<u8>>, u64);

/// Serializes one record frame, returning the number of bytes written.
pub(crate) fn write_record<W: Write>(
    w: &mut W,
    key: &[u8],
    value: Option<&[u8]>,
    ts: u64,
) -> Result<u64, SSTableError> {
    let value_bytes = value.unwrap_or(b"");
    let op = if value.is_some() { OP_PUT } else { OP_DELETE };

    w.write_u64::<LittleEndian>(key.len() as u64)?;
    w.write_all(key)?;
    w.write_u64::<LittleEndian>(value_bytes.len() as u64)?;
    w.write_all(value_bytes)?;
    w.write_u64::<LittleEndian>(ts)?;
    w.write_u8(op)?;

    Ok(8 + key.len() as u64 + 8 + value_bytes.len() as u64 + 8 + 1)
}

/// Writes the end-of-data sentinel.
pub(crate) fn write_end_marker<W: Write>(w: &mut W) -> Result<(), SSTableError> {
    w.write_u64::<LittleEndian>(END_OF_DATA)?;
    Ok(())
}

/// Reads one record frame, or `None` at the end-of-data sentinel.
pub(crate) fn read_record<R: Read>(r: &mut R) -> Result<Option<Record>, SSTableError> {
    let key_len = r.read_u64::<LittleEndian>()?;
    if key_len == END_OF_DATA {
        return Ok(None);
    }
    if key_len > MAX_KEY_BYTES {
        return Err(SSTableError::Format(format!(
            "key_len {} exceeds maximum {}",
            key_len, MAX_KEY_BYTES
        )));
    }
    let mut key = vec![0u8; key_len as usize];
    r.read_exact(&mut key)?;

    let value_len = r.read_u64::<LittleEndian>()?;
    if value_len > MAX_VALUE_BYTES {
        return Err(SSTableError::Format(format!(
            "value_len {} exceeds maximum {}",
            value_len, MAX_VALUE_BYTES
        )));
    }
    let mut value = vec![0u8; value_len as usize];
    r.read_exact(&mut value)?;

    let ts = r.read_u64::<LittleEndian>()?;
    let op = r.read_u8()?;

    match op {
        OP_PUT => Ok(Some((key, Some(value), ts))),
        OP_DELETE => Ok(Some((key, None, ts))),
        other => Err(SSTableError::Format(format!("unknown op code {}", other))),
    }
}
