//! SSTable builder: sorted records in, atomically published table out.

use crc32fast::Hasher as Crc32;
use std::fs::{rename, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bloom::BloomFilter;
use tracing::debug;

use crate::format::{write_end_marker, write_record, FORMAT_VERSION, META_MAGIC};
use crate::index::SparseIndex;
use crate::meta::TableMeta;
use crate::SSTableError;

/// Tuning knobs for a single table build.
#[derive(Debug, Clone, Copy)]
pub struct TableWriterOptions {
    /// Target false positive rate for the table's bloom filter.
    pub bloom_fp_rate: f64,
    /// Sample every Nth record into the sparse index (block size).
    pub index_interval: usize,
}

impl Default for TableWriterOptions {
    fn default() -> Self {
        Self {
            bloom_fp_rate: 0.01,
            index_interval: 16,
        }
    }
}

/// Streams records (in strictly increasing key order) into a new SSTable.
///
/// Writes go to `.tmp` siblings of the final paths; [`finalize`](Self::finalize)
/// fsyncs both files and renames them into place, so a crash at any earlier
/// point leaves only temporaries for the next open to reclaim.
pub struct TableWriter {
    id: u64,
    level: u32,
    data_path: PathBuf,
    meta_path: PathBuf,
    tmp_data_path: PathBuf,
    tmp_meta_path: PathBuf,
    file: BufWriter<File>,
    opts: TableWriterOptions,

    min_key: Option<Vec<u8>>,
    last_key: Option<Vec<u8>>,
    ts_min: u64,
    ts_max: u64,
    count: u64,
    offset: u64,

    index: SparseIndex,
    /// Keys buffered for the bloom filter, which is sized at finalize once
    /// the record count is known.
    bloom_keys: Vec<Vec<u8>>,
}

/// Final paths of table `id` at `level` under `sst_dir`.
pub(crate) fn table_paths(sst_dir: &Path, level: u32, id: u64) -> (PathBuf, PathBuf) {
    (
        sst_dir.join(format!("sst-{}-{}.data", level, id)),
        sst_dir.join(format!("sst-{}-{}.meta", level, id)),
    )
}

impl TableWriter {
    /// Starts a new table at `sst_dir/sst-<level>-<id>.{data,meta}`.
    pub fn create(
        sst_dir: &Path,
        level: u32,
        id: u64,
        opts: TableWriterOptions,
    ) -> Result<Self, SSTableError> {
        std::fs::create_dir_all(sst_dir)?;
        let (data_path, meta_path) = table_paths(sst_dir, level, id);
        let tmp_data_path = data_path.with_extension("data.tmp");
        let tmp_meta_path = meta_path.with_extension("meta.tmp");

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_data_path)?;

        Ok(Self {
            id,
            level,
            data_path,
            meta_path,
            tmp_data_path,
            tmp_meta_path,
            file: BufWriter::new(file),
            opts,
            min_key: None,
            last_key: None,
            ts_min: u64::MAX,
            ts_max: 0,
            count: 0,
            offset: 0,
            index: SparseIndex::new(),
            bloom_keys: Vec::new(),
        })
    }

    /// Appends one record. Keys must be strictly increasing.
    pub fn add(&mut self, key: &[u8], value: Option<&[u8]>, ts: u64) -> Result<(), SSTableError> {
        if let Some(last) = &self.last_key {
            if last.as_slice() >= key {
                return Err(SSTableError::OutOfOrder(format!(
                    "{:?} then {:?}",
                    last, key
                )));
            }
        }

        // First record of every block lands in the sparse index.
        if self.count % self.opts.index_interval as u64 == 0 {
            self.index.push(key.to_vec(), self.offset);
        }

        if self.min_key.is_none() {
            self.min_key = Some(key.to_vec());
        }
        self.ts_min = self.ts_min.min(ts);
        self.ts_max = self.ts_max.max(ts);

        self.offset += write_record(&mut self.file, key, value, ts)?;
        self.count += 1;
        self.bloom_keys.push(key.to_vec());
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    /// Bytes of record data written so far (callers use this to split
    /// output tables at a size threshold).
    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Writes the sentinel and meta sidecar, fsyncs, and atomically
    /// publishes both files. Returns the descriptor for the catalog.
    pub fn finalize(mut self) -> Result<TableMeta, SSTableError> {
        if self.count == 0 {
            self.discard();
            return Err(SSTableError::Format(
                "cannot finalize an empty table".to_string(),
            ));
        }

        write_end_marker(&mut self.file)?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;

        // Bloom over every key, sized for the actual record count.
        let mut filter = BloomFilter::new(self.bloom_keys.len(), self.opts.bloom_fp_rate);
        for key in &self.bloom_keys {
            filter.add(key);
        }
        let mut bloom_buf = Vec::with_capacity(filter.serialized_size());
        filter.write_to(&mut bloom_buf)?;

        let mut index_buf = Vec::new();
        self.index.encode_into(&mut index_buf);

        let min_key = self.min_key.clone().expect("non-empty table has min key");
        let max_key = self.last_key.clone().expect("non-empty table has max key");

        let mut footer_buf = Vec::new();
        footer_buf.extend_from_slice(&(min_key.len() as u32).to_le_bytes());
        footer_buf.extend_from_slice(&min_key);
        footer_buf.extend_from_slice(&(max_key.len() as u32).to_le_bytes());
        footer_buf.extend_from_slice(&max_key);
        footer_buf.extend_from_slice(&self.ts_min.to_le_bytes());
        footer_buf.extend_from_slice(&self.ts_max.to_le_bytes());
        footer_buf.extend_from_slice(&self.count.to_le_bytes());
        footer_buf.extend_from_slice(&self.offset.to_le_bytes());

        // Assemble the sidecar: header, three length-prefixed sections,
        // trailing CRC over the sections.
        let mut meta_bytes = Vec::new();
        meta_bytes.extend_from_slice(&META_MAGIC.to_le_bytes());
        meta_bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        for section in [&bloom_buf, &index_buf, &footer_buf] {
            meta_bytes.extend_from_slice(&(section.len() as u32).to_le_bytes());
            meta_bytes.extend_from_slice(section);
        }
        let mut hasher = Crc32::new();
        hasher.update(&meta_bytes[8..]);
        meta_bytes.extend_from_slice(&hasher.finalize().to_le_bytes());

        {
            let mut meta_file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.tmp_meta_path)?;
            meta_file.write_all(&meta_bytes)?;
            meta_file.sync_all()?;
        }

        rename(&self.tmp_data_path, &self.data_path)?;
        rename(&self.tmp_meta_path, &self.meta_path)?;

        debug!(
            level = self.level,
            id = self.id,
            records = self.count,
            bytes = self.offset,
            "published sstable"
        );

        Ok(TableMeta {
            id: self.id,
            level: self.level,
            data_path: self.data_path,
            meta_path: self.meta_path,
            min_key,
            max_key,
            count: self.count,
            data_size: self.offset,
            ts_min: self.ts_min,
            ts_max: self.ts_max,
        })
    }

    /// Removes the temporary files without publishing anything. Used when a
    /// merge fails partway through a table.
    pub fn discard(&mut self) {
        let _ = std::fs::remove_file(&self.tmp_data_path);
        let _ = std::fs::remove_file(&self.tmp_meta_path);
    }
}
