//! # Record - the unit of storage
//!
//! Every layer of StrataKV (WAL, memtable, SSTable, iterators) moves the same
//! value around: a [`Record`] holding a key, a value, a write timestamp, a
//! tombstone flag and a CRC32 checksum over `key ++ value`.
//!
//! ## Binary Layout
//!
//! All integers are big-endian.
//!
//! ```text
//! [key_len: u64][key][checksum: u32][timestamp: u64][tombstone: u8]
//! [value_len: u64][value]          <- only when tombstone == 0
//! ```
//!
//! A tombstone carries no value on disk. Decoding reports the number of bytes
//! consumed so callers can walk a buffer of concatenated records.
//!
//! ## Example
//!
//! ```rust
//! use record::{codec, Record};
//!
//! let rec = Record::live("hello", b"world".to_vec(), 1);
//! let bytes = codec::encode(&rec);
//! let (decoded, used) = codec::decode(&bytes).unwrap();
//! assert_eq!(decoded, rec);
//! assert_eq!(used, bytes.len());
//! ```

pub mod codec;

pub use codec::CodecError;

/// A single key-value mutation.
///
/// Construct through [`Record::live`] or [`Record::tombstone`] so the
/// checksum always matches the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    /// Empty for tombstones.
    pub value: Vec<u8>,
    /// Monotonic write timestamp assigned by the engine.
    pub timestamp: u64,
    pub tombstone: bool,
    /// CRC32 over `key ++ value`.
    pub checksum: u32,
}

impl Record {
    /// Creates a live record carrying `value`.
    pub fn live(key: impl Into<String>, value: Vec<u8>, timestamp: u64) -> Self {
        let key = key.into();
        let checksum = checksum(key.as_bytes(), &value);
        Self {
            key,
            value,
            timestamp,
            tombstone: false,
            checksum,
        }
    }

    /// Creates a delete marker for `key`.
    pub fn tombstone(key: impl Into<String>, timestamp: u64) -> Self {
        let key = key.into();
        let checksum = checksum(key.as_bytes(), &[]);
        Self {
            key,
            value: Vec::new(),
            timestamp,
            tombstone: true,
            checksum,
        }
    }

    /// Returns `true` if the stored checksum matches the payload.
    #[must_use]
    pub fn verify(&self) -> bool {
        checksum(self.key.as_bytes(), &self.value) == self.checksum
    }

    /// Returns the value for live records, `None` for tombstones.
    #[must_use]
    pub fn live_value(&self) -> Option<&[u8]> {
        if self.tombstone {
            None
        } else {
            Some(&self.value)
        }
    }

    /// Returns a copy of this record with a different key and a recomputed
    /// checksum. Used when keys are swapped for dictionary codes on disk.
    #[must_use]
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        let key = key.into();
        let checksum = checksum(key.as_bytes(), &self.value);
        Self {
            key,
            value: self.value.clone(),
            timestamp: self.timestamp,
            tombstone: self.tombstone,
            checksum,
        }
    }

    /// Size of this record once encoded.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let base = 8 + self.key.len() + 4 + 8 + 1;
        if self.tombstone {
            base
        } else {
            base + 8 + self.value.len()
        }
    }
}

/// CRC32 over the key bytes followed by the value bytes.
#[must_use]
pub fn checksum(key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// A cursor over one ordered source of records.
///
/// Implemented by memtable snapshots, SSTable scans and merged groups.
/// Sources yield records in ascending key order with at most one record per
/// key. Tombstones are yielded as well so that merges can shadow older data;
/// filtering happens in the outermost iterator.
pub trait RecordIterator {
    /// Returns the next record, or `None` once the source is exhausted.
    fn next_entry(&mut self) -> anyhow::Result<Option<Record>>;

    /// Releases file handles and snapshots. Safe to call more than once;
    /// after `stop` the iterator yields `None`.
    fn stop(&mut self);
}

impl<I: RecordIterator + ?Sized> RecordIterator for Box<I> {
    fn next_entry(&mut self) -> anyhow::Result<Option<Record>> {
        (**self).next_entry()
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}
