//! The SSTable descriptor carried by the catalog.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Describes one published SSTable. Descriptors are plain values: the
/// catalog persists them in the manifest, compaction passes them around,
/// and readers open files from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    /// Monotonic table identity, allocated by the catalog.
    pub id: u64,
    /// LSM level this table lives at.
    pub level: u32,
    pub data_path: PathBuf,
    pub meta_path: PathBuf,
    #[serde(with = "hex_bytes")]
    pub min_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub max_key: Vec<u8>,
    /// Number of records in the data file.
    pub count: u64,
    /// Size of the data file in bytes (excluding the sentinel).
    pub data_size: u64,
    pub ts_min: u64,
    pub ts_max: u64,
}

impl TableMeta {
    /// Whether this table's key range intersects `[lo, hi)` (`None` = open).
    #[must_use]
    pub fn overlaps_range(&self, lo: Option<&[u8]>, hi: Option<&[u8]>) -> bool {
        if let Some(lo) = lo {
            if self.max_key.as_slice() < lo {
                return false;
            }
        }
        if let Some(hi) = hi {
            if self.min_key.as_slice() >= hi {
                return false;
            }
        }
        true
    }

    /// Whether `key` falls inside this table's `[min_key, max_key]` span.
    #[must_use]
    pub fn covers_key(&self, key: &[u8]) -> bool {
        self.min_key.as_slice() <= key && key <= self.max_key.as_slice()
    }
}

/// Binary keys are stored hex-encoded in the JSON manifest.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        let mut out = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            out.push_str(&format!("{:02x}", b));
        }
        ser.serialize_str(&out)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        if s.len() % 2 != 0 {
            return Err(serde::de::Error::custom("odd-length hex string"));
        }
        (0..s.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&s[i..i + 2], 16)
                    .map_err(|e| serde::de::Error::custom(format!("bad hex: {}", e)))
            })
            .collect()
    }
}
