//! SSTable reader: point lookups and ordered range scans.

use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::sync::Mutex;

use bloom::BloomFilter;

use crate::format::{read_record, FORMAT_VERSION, META_MAGIC};
use crate::index::SparseIndex;
use crate::meta::TableMeta;
use crate::SSTableError;

/// Parsed contents of the meta sidecar's footer section.
#[derive(Debug)]
struct Footer {
    min_key: Vec<u8>,
    max_key: Vec<u8>,
    #[allow(dead_code)]
    ts_min: u64,
    #[allow(dead_code)]
    ts_max: u64,
    count: u64,
    data_size: u64,
}

/// Reads a published SSTable.
///
/// On [`open`](TableReader::open) the whole meta sidecar (bloom filter,
/// sparse index, footer) is loaded and validated; a persistent handle on
/// the data file is kept for point lookups, wrapped in a `Mutex` so `get`
/// works through `&self`. Range scans open their own handle so they can
/// outlive individual `get` calls. Dropping the reader releases the
/// handles.
pub struct TableReader {
    meta: TableMeta,
    bloom: BloomFilter,
    index: SparseIndex,
    footer: Footer,
    file: Mutex<BufReader<File>>,
}

impl TableReader {
    /// Opens the table described by `meta`, validating the sidecar's magic,
    /// version, and checksum.
    pub fn open(meta: &TableMeta) -> Result<Self, SSTableError> {
        let raw = std::fs::read(&meta.meta_path)?;
        if raw.len() < 12 {
            return Err(SSTableError::Format("meta sidecar too small".to_string()));
        }

        let mut cur = Cursor::new(&raw);
        let magic = cur.read_u32::<LittleEndian>()?;
        if magic != META_MAGIC {
            return Err(SSTableError::Format(format!(
                "bad meta magic {:#010x}",
                magic
            )));
        }
        let version = cur.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(SSTableError::Format(format!(
                "unsupported sstable format version {}",
                version
            )));
        }

        // CRC over everything between the header and the trailing checksum.
        let body = &raw[8..raw.len() - 4];
        let stored_crc =
            u32::from_le_bytes(raw[raw.len() - 4..].try_into().expect("crc slice"));
        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != stored_crc {
            return Err(SSTableError::Format("meta sidecar crc mismatch".to_string()));
        }

        let bloom_section = read_section(&mut cur, &raw)?;
        let bloom = BloomFilter::read_from(&mut Cursor::new(bloom_section))?;

        let index_section = read_section(&mut cur, &raw)?;
        let index = SparseIndex::read_from(&mut Cursor::new(index_section))?;

        let footer_section = read_section(&mut cur, &raw)?;
        let footer = parse_footer(footer_section)?;

        let file = File::open(&meta.data_path)?;

        Ok(Self {
            meta: meta.clone(),
            bloom,
            index,
            footer,
            file: Mutex::new(BufReader::new(file)),
        })
    }

    /// Returns `false` when the key is **definitely not** in this table:
    /// either outside `[min_key, max_key]` or rejected by the bloom filter.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        if key < self.footer.min_key.as_slice() || key > self.footer.max_key.as_slice() {
            return false;
        }
        self.bloom.may_contain(key)
    }

    /// Point lookup. Returns the stored `(value, ts)` pair, where `value` is
    /// `None` for a tombstone, or `None` when the key is not in this table.
    ///
    /// Seeks to the block picked by the sparse index and scans linearly,
    /// early-exiting as soon as a greater key is seen.
    pub fn get(&self, key: &[u8]) -> Result<Option<(Option<Vec<u8>>, u64)>, SSTableError> {
        if !self.may_contain(key) {
            return Ok(None);
        }

        let offset = self.index.find_block_offset(key);
        let mut file = self.file.lock().map_err(|_| {
            SSTableError::Format("reader lock poisoned".to_string())
        })?;
        file.seek(SeekFrom::Start(offset))?;

        while let Some((rec_key, value, ts)) = read_record(&mut *file)? {
            if rec_key.as_slice() > key {
                return Ok(None);
            }
            if rec_key.as_slice() == key {
                return Ok(Some((value, ts)));
            }
        }
        Ok(None)
    }

    /// Ordered scan of records with `lo <= key < hi` (`None` = open).
    ///
    /// The iterator owns its own file handle, seeks to the block containing
    /// `lo`, and stops at `hi` or the end sentinel.
    pub fn iter_range(
        &self,
        lo: Option<&[u8]>,
        hi: Option<&[u8]>,
    ) -> Result<TableIter, SSTableError> {
        let file = File::open(&self.meta.data_path)?;
        let mut rdr = BufReader::new(file);
        if let Some(lo) = lo {
            rdr.seek(SeekFrom::Start(self.index.find_block_offset(lo)))?;
        }
        Ok(TableIter {
            rdr,
            lo: lo.map(<[u8]>::to_vec),
            hi: hi.map(<[u8]>::to_vec),
            done: false,
        })
    }

    /// The descriptor this reader was opened from.
    #[must_use]
    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.footer.count
    }

    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.footer.data_size
    }

    /// Releases the data-file handle. Dropping the reader does the same;
    /// this form just makes the hand-back explicit at call sites.
    pub fn close(self) {}
}

/// Streaming cursor over a table's records within `[lo, hi)`.
pub struct TableIter {
    rdr: BufReader<File>,
    /// Records below `lo` are skipped until the first in-range key.
    lo: Option<Vec<u8>>,
    hi: Option<Vec<u8>>,
    done: bool,
}

impl TableIter {
    /// Returns the next record in key order, or `None` past `hi` / at the
    /// end of the table.
    pub fn next_record(
        &mut self,
    ) -> Result<Option<(Vec<u8>, Option<Vec<u8>>, u64)>, SSTableError> {
        if self.done {
            return Ok(None);
        }
        loop {
            let Some((key, value, ts)) = read_record(&mut self.rdr)? else {
                self.done = true;
                return Ok(None);
            };

            if let Some(lo) = &self.lo {
                if key.as_slice() < lo.as_slice() {
                    continue;
                }
                self.lo = None;
            }
            if let Some(hi) = &self.hi {
                if key.as_slice() >= hi.as_slice() {
                    self.done = true;
                    return Ok(None);
                }
            }
            return Ok(Some((key, value, ts)));
        }
    }
}

/// Reads one `[len: u32][bytes]` section, returning the byte slice.
fn read_section<'a>(cur: &mut Cursor<&'a Vec<u8>>, raw: &'a [u8]) -> Result<&'a [u8], SSTableError> {
    let len = cur.read_u32::<LittleEndian>()? as usize;
    let start = cur.position() as usize;
    // The trailing 4 bytes are the sidecar CRC, never part of a section.
    if start + len > raw.len().saturating_sub(4) {
        return Err(SSTableError::Format(
            "meta section extends past end of sidecar".to_string(),
        ));
    }
    cur.set_position((start + len) as u64);
    Ok(&raw[start..start + len])
}

fn parse_footer(bytes: &[u8]) -> Result<Footer, SSTableError> {
    let mut cur = Cursor::new(bytes);

    let min_len = cur.read_u32::<LittleEndian>()? as usize;
    let mut min_key = vec![0u8; min_len];
    cur.read_exact(&mut min_key)?;

    let max_len = cur.read_u32::<LittleEndian>()? as usize;
    let mut max_key = vec![0u8; max_len];
    cur.read_exact(&mut max_key)?;

    Ok(Footer {
        min_key,
        max_key,
        ts_min: cur.read_u64::<LittleEndian>()?,
        ts_max: cur.read_u64::<LittleEndian>()?,
        count: cur.read_u64::<LittleEndian>()?,
        data_size: cur.read_u64::<LittleEndian>()?,
    })
}
