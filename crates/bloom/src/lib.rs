//! Probabilistic key-membership filter.
//!
//! Answers "is this key possibly in the set?" using a fixed bit array and a
//! handful of hash probes per key. A negative answer is definitive; a
//! positive answer is wrong with a small, tunable probability. That
//! asymmetry is exactly what the read path wants: a table whose filter
//! rejects a key can be skipped without touching its index or data file,
//! and a false positive only costs one wasted lookup.
//!
//! Construction picks the array size and probe count from the expected key
//! count `n` and the target false-positive rate `p` using the standard
//! derivations `m = -n ln p / (ln 2)^2` and `k = round(m/n * ln 2)`.
//! Probing uses one SHA-256 digest per key, split into two 64-bit lanes
//! that seed an arithmetic probe sequence.
//!
//! ```rust,no_run
//! use bloom::BloomFilter;
//!
//! let mut filter = BloomFilter::new(10_000, 0.01);
//! filter.add(b"order:4711");
//! assert!(filter.may_contain(b"order:4711"));
//! ```

use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read, Write};

/// Version byte leading the serialized form.
const SERIAL_VERSION: u8 = 1;

/// Ceiling on the bit-array length accepted during deserialization, so a
/// corrupt header cannot turn into a giant allocation.
const MAX_FILTER_BITS: u64 = 1 << 33;

/// A bloom filter: `k` probe positions per key over an `m`-bit array.
pub struct BloomFilter {
    probes: u32,
    bitmap: BitArray,
}

impl BloomFilter {
    /// Sizes a filter for `expected_keys` insertions at the given target
    /// `false_positive_rate`.
    ///
    /// # Panics
    ///
    /// Panics when `expected_keys` is zero or the rate is not strictly
    /// between 0 and 1; neither describes a filter that can exist.
    pub fn new(expected_keys: usize, false_positive_rate: f64) -> Self {
        assert!(expected_keys > 0, "filter needs at least one expected key");
        assert!(
            0.0 < false_positive_rate && false_positive_rate < 1.0,
            "false positive rate must lie strictly between 0 and 1"
        );

        let (bits, probes) = dimension(expected_keys, false_positive_rate);
        Self {
            probes,
            bitmap: BitArray::zeroed(bits),
        }
    }

    /// Records `key` as a member.
    pub fn add(&mut self, key: &[u8]) {
        let (h1, h2) = probe_lanes(key);
        let len = self.bitmap.bit_len();
        for i in 0..u64::from(self.probes) {
            self.bitmap.set(h1.wrapping_add(i.wrapping_mul(h2)) % len);
        }
    }

    /// `false` means the key was never added. `true` means it probably was:
    /// all of its probe positions are set, which unrelated keys can also
    /// arrange with probability around the configured rate.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = probe_lanes(key);
        let len = self.bitmap.bit_len();
        (0..u64::from(self.probes))
            .all(|i| self.bitmap.test(h1.wrapping_add(i.wrapping_mul(h2)) % len))
    }

    /// Length of the bit array (`m`).
    #[must_use]
    pub fn bit_len(&self) -> u64 {
        self.bitmap.bit_len()
    }

    /// Number of probe positions per key (`k`).
    #[must_use]
    pub fn probes(&self) -> u32 {
        self.probes
    }

    /// Size in bytes of the serialized form.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        1 + 8 + 4 + self.bitmap.byte_len()
    }

    /// Writes the filter as `[version: u8][m: u64 LE][k: u32 LE][bitmap]`.
    /// The bitmap length follows from `m`, so the format is self-describing.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[SERIAL_VERSION])?;
        w.write_all(&self.bitmap.bit_len().to_le_bytes())?;
        w.write_all(&self.probes.to_le_bytes())?;
        self.bitmap.write_bytes(w)
    }

    /// Reads back a filter produced by [`write_to`](Self::write_to).
    /// Membership answers are identical to the filter that was written.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut version = [0u8; 1];
        r.read_exact(&mut version)?;
        if version[0] != SERIAL_VERSION {
            return Err(invalid(format!("bloom filter version {}", version[0])));
        }

        let mut m_buf = [0u8; 8];
        r.read_exact(&mut m_buf)?;
        let bits = u64::from_le_bytes(m_buf);
        if bits == 0 || bits > MAX_FILTER_BITS {
            return Err(invalid(format!("bloom filter bit length {}", bits)));
        }

        let mut k_buf = [0u8; 4];
        r.read_exact(&mut k_buf)?;
        let probes = u32::from_le_bytes(k_buf);

        Ok(Self {
            probes,
            bitmap: BitArray::read_bytes(bits, r)?,
        })
    }
}

impl fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BloomFilter({} bits, {} probes)",
            self.bitmap.bit_len(),
            self.probes
        )
    }
}

/// Derives `(m, k)` for `n` keys at rate `p`. `m` is floored at one word
/// and `k` at one probe so degenerate inputs still yield a working filter.
fn dimension(n: usize, p: f64) -> (u64, u32) {
    let ln2 = std::f64::consts::LN_2;
    let bits = (-(n as f64) * p.ln() / (ln2 * ln2)).ceil().max(64.0) as u64;
    let probes = ((bits as f64 / n as f64) * ln2).round().max(1.0) as u32;
    (bits, probes)
}

/// Hashes `key` once and splits the digest into the two lanes that drive
/// the probe sequence `h1 + i*h2 (mod m)`. The stride lane is forced odd;
/// a zero or even stride would revisit the same few positions.
fn probe_lanes(key: &[u8]) -> (u64, u64) {
    let digest = Sha256::digest(key);
    let mut lane = [0u8; 8];
    lane.copy_from_slice(&digest[..8]);
    let h1 = u64::from_le_bytes(lane);
    lane.copy_from_slice(&digest[8..16]);
    let h2 = u64::from_le_bytes(lane);
    (h1, h2 | 1)
}

fn invalid(what: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("unusable {}", what))
}

/// Fixed-length bit array stored as 64-bit words.
struct BitArray {
    bits: u64,
    words: Vec<u64>,
}

impl BitArray {
    fn zeroed(bits: u64) -> Self {
        let word_count = bits.div_ceil(64) as usize;
        Self {
            bits,
            words: vec![0; word_count],
        }
    }

    fn bit_len(&self) -> u64 {
        self.bits
    }

    fn byte_len(&self) -> usize {
        self.bits.div_ceil(8) as usize
    }

    fn set(&mut self, idx: u64) {
        self.words[(idx / 64) as usize] |= 1u64 << (idx % 64);
    }

    fn test(&self, idx: u64) -> bool {
        self.words[(idx / 64) as usize] & (1u64 << (idx % 64)) != 0
    }

    /// Emits exactly `byte_len()` bytes, each word little-endian, the last
    /// word truncated to the bytes the bit length actually covers.
    fn write_bytes<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut remaining = self.byte_len();
        for word in &self.words {
            let chunk = remaining.min(8);
            w.write_all(&word.to_le_bytes()[..chunk])?;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Inverse of [`write_bytes`]: reconstructs the word array from the
    /// byte stream for a known bit length.
    fn read_bytes<R: Read>(bits: u64, r: &mut R) -> io::Result<Self> {
        let mut array = Self::zeroed(bits);
        let mut remaining = array.byte_len();
        for word in &mut array.words {
            let chunk = remaining.min(8);
            let mut buf = [0u8; 8];
            r.read_exact(&mut buf[..chunk])?;
            *word = u64::from_le_bytes(buf);
            remaining -= chunk;
        }
        Ok(array)
    }
}
