//! SSTable binary format: file names, the single-file header, the summary
//! section and the index-entry encoding shared by index and summary.
//!
//! ## Index / summary entry
//!
//! ```text
//! [key_len: u64 BE][key][offset: u64 BE]
//! ```
//!
//! Index offsets point into the data section, summary offsets into the index
//! section.
//!
//! ## Summary section
//!
//! ```text
//! [min_len: u64][min][max_len: u64][max][max_timestamp: u64][record_count: u64]
//! [entry]*
//! ```
//!
//! ## Single-file header
//!
//! ```text
//! [header_len: u64][min_len: u64][min][max_len: u64][max]
//! [data_offset: u64][index_offset: u64][summary_offset: u64]
//! [filter_offset: u64][merkle_offset: u64]
//! ```
//!
//! `header_len` counts the whole header including itself. Section offsets are
//! absolute file offsets; each section ends where the next one begins and the
//! merkle section ends at the end of the file.
//!
//! Keys are stored in their on-disk form everywhere in a table: raw keys, or
//! decimal dictionary codes when the table was written with compression.

use anyhow::{bail, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use record::codec::MAX_KEY_BYTES;
use std::io::{self, Read, Write};

pub const DATA_FILE: &str = "data.db";
pub const INDEX_FILE: &str = "index.db";
pub const SUMMARY_FILE: &str = "summary.db";
pub const FILTER_FILE: &str = "filter.db";
pub const MERKLE_FILE: &str = "merkle.db";
pub const TABLE_FILE: &str = "table.db";
pub const DICTIONARY_FILE: &str = "dictionary.db";

/// Physical arrangement of the five sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One file per section.
    Separate,
    /// Header plus all sections in `table.db`.
    SingleFile,
}

/// Write-time parameters of a table. Degrees are baked into the files.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableOptions {
    pub single_file: bool,
    pub compression: bool,
    /// Every Nth record gets an index entry.
    pub index_degree: usize,
    /// Every Mth index entry gets a summary entry.
    pub summary_degree: usize,
    pub bloom_fpr: f64,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            single_file: false,
            compression: false,
            index_degree: 16,
            summary_degree: 16,
            bloom_fpr: 0.01,
        }
    }
}

impl TableOptions {
    pub fn layout(&self) -> Layout {
        if self.single_file {
            Layout::SingleFile
        } else {
            Layout::Separate
        }
    }
}

/// A key with the byte offset it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: String,
    pub offset: u64,
}

impl IndexEntry {
    pub fn encoded_len(&self) -> u64 {
        8 + self.key.len() as u64 + 8
    }
}

pub fn write_key<W: Write>(w: &mut W, key: &str) -> io::Result<()> {
    w.write_u64::<BigEndian>(key.len() as u64)?;
    w.write_all(key.as_bytes())
}

pub fn read_key<R: Read>(r: &mut R) -> Result<String> {
    let len = r.read_u64::<BigEndian>()?;
    if len > MAX_KEY_BYTES as u64 {
        bail!("corrupt table: key_len {} exceeds maximum {}", len, MAX_KEY_BYTES);
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

pub fn write_entry<W: Write>(w: &mut W, entry: &IndexEntry) -> io::Result<()> {
    write_key(w, &entry.key)?;
    w.write_u64::<BigEndian>(entry.offset)
}

pub fn read_entry<R: Read>(r: &mut R) -> Result<IndexEntry> {
    let key = read_key(r)?;
    let offset = r.read_u64::<BigEndian>()?;
    Ok(IndexEntry { key, offset })
}

/// Decodes every entry of a byte range of the index or summary.
pub fn read_entries(mut buf: &[u8]) -> Result<Vec<IndexEntry>> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        out.push(read_entry(&mut buf)?);
    }
    Ok(out)
}

/// The summary section as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub min_key: String,
    pub max_key: String,
    pub max_timestamp: u64,
    pub record_count: u64,
    pub entries: Vec<IndexEntry>,
}

impl Summary {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_key(w, &self.min_key)?;
        write_key(w, &self.max_key)?;
        w.write_u64::<BigEndian>(self.max_timestamp)?;
        w.write_u64::<BigEndian>(self.record_count)?;
        for entry in &self.entries {
            write_entry(w, entry)?;
        }
        Ok(())
    }

    pub fn from_bytes(mut buf: &[u8]) -> Result<Self> {
        let min_key = read_key(&mut buf)?;
        let max_key = read_key(&mut buf)?;
        let max_timestamp = buf.read_u64::<BigEndian>()?;
        let record_count = buf.read_u64::<BigEndian>()?;
        let entries = read_entries(buf)?;
        Ok(Self {
            min_key,
            max_key,
            max_timestamp,
            record_count,
            entries,
        })
    }
}

/// Header of a single-file table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHeader {
    pub min_key: String,
    pub max_key: String,
    pub data_offset: u64,
    pub index_offset: u64,
    pub summary_offset: u64,
    pub filter_offset: u64,
    pub merkle_offset: u64,
}

impl TableHeader {
    /// Total header size for the given bounds.
    pub fn encoded_len(min_key: &str, max_key: &str) -> u64 {
        8 + (8 + min_key.len() as u64) + (8 + max_key.len() as u64) + 5 * 8
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<BigEndian>(Self::encoded_len(&self.min_key, &self.max_key))?;
        write_key(w, &self.min_key)?;
        write_key(w, &self.max_key)?;
        for offset in self.offsets() {
            w.write_u64::<BigEndian>(offset)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R, file_len: u64) -> Result<Self> {
        let header_len = r.read_u64::<BigEndian>()?;
        let min_key = read_key(r)?;
        let max_key = read_key(r)?;
        if header_len != Self::encoded_len(&min_key, &max_key) {
            bail!("corrupt table header: header_len {} does not match contents", header_len);
        }
        let header = Self {
            min_key,
            max_key,
            data_offset: r.read_u64::<BigEndian>()?,
            index_offset: r.read_u64::<BigEndian>()?,
            summary_offset: r.read_u64::<BigEndian>()?,
            filter_offset: r.read_u64::<BigEndian>()?,
            merkle_offset: r.read_u64::<BigEndian>()?,
        };

        let offsets = header.offsets();
        if offsets[0] != header_len
            || offsets.windows(2).any(|w| w[0] > w[1])
            || offsets[4] > file_len
        {
            bail!("corrupt table header: section offsets {:?} out of order", offsets);
        }
        Ok(header)
    }

    /// Section offsets in file order: data, index, summary, filter, merkle.
    pub fn offsets(&self) -> [u64; 5] {
        [
            self.data_offset,
            self.index_offset,
            self.summary_offset,
            self.filter_offset,
            self.merkle_offset,
        ]
    }
}
