//! # Bloom Filter
//!
//! The membership filter stored in the filter section of every SSTable.
//!
//! A bloom filter answers "definitely absent" or "possibly present". It never
//! produces false negatives: a key that was inserted is always reported as
//! possibly present, which is what lets a negative answer short-circuit an
//! SSTable lookup.
//!
//! ## Hashing
//!
//! One 128-bit xxh3 hash per key, split into two 64-bit halves, drives
//! double hashing: `h(i) = h1 + i * h2 (mod m)`.
//!
//! ## Wire format (big-endian)
//!
//! ```text
//! [num_bits: u64][num_hashes: u32][words_len: u32][words: u64 * words_len]
//! ```
//!
//! ## Example
//!
//! ```rust
//! use bloom::BloomFilter;
//!
//! let mut bf = BloomFilter::new(1000, 0.01);
//! bf.insert(b"hello");
//! assert!(bf.may_contain(b"hello"));
//!
//! let restored = BloomFilter::from_bytes(&bf.to_bytes()).unwrap();
//! assert!(restored.may_contain(b"hello"));
//! ```
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use xxhash_rust::xxh3::xxh3_128;

/// Safety cap for deserialization: a filter should not exceed 128 MiB.
const MAX_FILTER_BYTES: usize = 128 * 1024 * 1024;

/// Bit-vector bloom filter with `k` derived hash functions.
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    /// Bit vector packed into 64-bit words.
    words: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_items` at the target
    /// `false_positive_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `expected_items` is 0 or `false_positive_rate` is not in `(0, 1)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );

        // m = -n * ln(p) / (ln 2)^2
        let n = expected_items as f64;
        let m = (-n * false_positive_rate.ln() / std::f64::consts::LN_2.powi(2)).ceil() as u64;
        let num_bits = m.max(64);

        // k = (m / n) * ln 2
        let k = ((num_bits as f64 / n) * std::f64::consts::LN_2).ceil() as u32;

        Self {
            words: vec![0u64; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes: k.max(1),
        }
    }

    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let bit = self.bit_index(h1, h2, i);
            self.words[(bit / 64) as usize] |= 1u64 << (bit % 64);
        }
    }

    /// Returns `false` only if `key` was never inserted.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_pair(key);
        (0..self.num_hashes).all(|i| {
            let bit = self.bit_index(h1, h2, i);
            self.words[(bit / 64) as usize] & (1u64 << (bit % 64)) != 0
        })
    }

    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Size of the serialized filter in bytes.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        8 + 4 + 4 + self.words.len() * 8
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<BigEndian>(self.num_bits)?;
        w.write_u32::<BigEndian>(self.num_hashes)?;
        w.write_u32::<BigEndian>(self.words.len() as u32)?;
        for word in &self.words {
            w.write_u64::<BigEndian>(*word)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let num_bits = r.read_u64::<BigEndian>()?;
        let num_hashes = r.read_u32::<BigEndian>()?;
        let words_len = r.read_u32::<BigEndian>()? as usize;

        if words_len.saturating_mul(8) > MAX_FILTER_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bloom filter too large: {} words", words_len),
            ));
        }
        if num_bits == 0 || num_bits > (words_len as u64) * 64 || num_hashes == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "inconsistent bloom filter header: bits={} hashes={} words={}",
                    num_bits, num_hashes, words_len
                ),
            ));
        }

        let mut words = Vec::with_capacity(words_len);
        for _ in 0..words_len {
            words.push(r.read_u64::<BigEndian>()?);
        }

        Ok(Self {
            words,
            num_bits,
            num_hashes,
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut buf);
        buf
    }

    pub fn from_bytes(mut bytes: &[u8]) -> io::Result<Self> {
        Self::read_from(&mut bytes)
    }

    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("bytes", &(self.words.len() * 8))
            .finish()
    }
}

/// Splits one 128-bit xxh3 hash into the two halves used for double hashing.
fn hash_pair(key: &[u8]) -> (u64, u64) {
    let h = xxh3_128(key);
    let h1 = h as u64;
    // An odd step visits distinct bits for every i.
    let h2 = ((h >> 64) as u64) | 1;
    (h1, h2)
}
