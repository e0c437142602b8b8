use anyhow::{anyhow, bail, Context, Result};
use bloom::BloomFilter;
use merkle::{MerkleBuilder, MerkleTree};
use record::{codec, Record};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Take};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::dictionary::Dictionary;
use crate::format::{
    read_entries, read_entry, IndexEntry, Layout, Summary, TableHeader, DATA_FILE,
    DICTIONARY_FILE, FILTER_FILE, INDEX_FILE, MERKLE_FILE, SUMMARY_FILE, TABLE_FILE,
};

/// Where a section lives: a file and a byte window inside it.
#[derive(Debug, Clone)]
pub(crate) struct SectionSpan {
    path: PathBuf,
    base: u64,
    len: u64,
}

impl SectionSpan {
    fn whole_file(path: PathBuf) -> Result<Self> {
        let len = std::fs::metadata(&path)
            .with_context(|| format!("missing sstable section {}", path.display()))?
            .len();
        Ok(Self { path, base: 0, len })
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        let mut f = File::open(&self.path)?;
        f.seek(SeekFrom::Start(self.base))?;
        let mut buf = vec![0u8; self.len as usize];
        f.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// A fresh handle reading from `start` to the end of the section.
    pub(crate) fn open_at(&self, start: u64) -> Result<Take<BufReader<File>>> {
        let start = start.min(self.len);
        let mut f = File::open(&self.path)?;
        f.seek(SeekFrom::Start(self.base + start))?;
        Ok(BufReader::new(f).take(self.len - start))
    }
}

/// A section with a persistent file handle, wrapped in a `Mutex` so reads
/// can go through a shared `&self`.
#[derive(Debug)]
struct Section {
    span: SectionSpan,
    file: Mutex<BufReader<File>>,
}

impl Section {
    fn open(span: SectionSpan) -> Result<Self> {
        let file = File::open(&span.path)?;
        Ok(Self {
            span,
            file: Mutex::new(BufReader::new(file)),
        })
    }

    /// Bytes `[start, end)` of the section. `end == 0` means "to the end of
    /// the section".
    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        let end = if end == 0 { self.span.len } else { end };
        if start > end || end > self.span.len {
            bail!(
                "range {}..{} outside section of {} bytes in {}",
                start,
                end,
                self.span.len,
                self.span.path.display()
            );
        }
        let mut f = self.file.lock().map_err(|e| anyhow!("lock poisoned: {}", e))?;
        f.seek(SeekFrom::Start(self.span.base + start))?;
        let mut buf = vec![0u8; (end - start) as usize];
        f.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_entry_at(&self, offset: u64) -> Result<IndexEntry> {
        if offset >= self.span.len {
            bail!("index offset {} outside section of {} bytes", offset, self.span.len);
        }
        let mut f = self.file.lock().map_err(|e| anyhow!("lock poisoned: {}", e))?;
        f.seek(SeekFrom::Start(self.span.base + offset))?;
        read_entry(&mut *f)
    }
}

/// Restores the original key of a record read from a compressed table.
pub(crate) fn restore_key(dictionary: Option<&Dictionary>, rec: Record) -> Result<Record> {
    match dictionary {
        Some(d) => {
            let key = d.decode(&rec.key)?.to_string();
            Ok(rec.with_key(key))
        }
        None => Ok(rec),
    }
}

/// Reads one SSTable directory for point lookups and iteration.
///
/// On [`open`](SSTableReader::open) the **summary**, the bloom filter and the
/// dictionary (if any) are loaded into memory. Index and data are read on
/// demand through persistent file handles.
///
/// A point lookup costs one index range read and one data range read.
#[derive(Debug)]
pub struct SSTableReader {
    dir: PathBuf,
    layout: Layout,
    data: Section,
    index: Section,
    merkle: SectionSpan,
    bloom: BloomFilter,
    /// Keys already mapped back to their original form.
    summary: Summary,
    dictionary: Option<Arc<Dictionary>>,
}

impl SSTableReader {
    /// Opens the table in `dir`, detecting its layout.
    ///
    /// # Errors
    ///
    /// Returns an error if a section is missing, the single-file header is
    /// inconsistent, or the summary, filter or dictionary cannot be decoded.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let table_path = dir.join(TABLE_FILE);

        let (layout, spans, header) = if table_path.exists() {
            let file = File::open(&table_path)?;
            let file_len = file.metadata()?.len();
            let header = TableHeader::read_from(&mut BufReader::new(file), file_len)
                .with_context(|| format!("bad header in {}", table_path.display()))?;
            let offsets = header.offsets();
            let ends = [offsets[1], offsets[2], offsets[3], offsets[4], file_len];
            let spans = [0, 1, 2, 3, 4].map(|i| SectionSpan {
                path: table_path.clone(),
                base: offsets[i],
                len: ends[i] - offsets[i],
            });
            (Layout::SingleFile, spans, Some(header))
        } else {
            let spans = [
                SectionSpan::whole_file(dir.join(DATA_FILE))?,
                SectionSpan::whole_file(dir.join(INDEX_FILE))?,
                SectionSpan::whole_file(dir.join(SUMMARY_FILE))?,
                SectionSpan::whole_file(dir.join(FILTER_FILE))?,
                SectionSpan::whole_file(dir.join(MERKLE_FILE))?,
            ];
            (Layout::Separate, spans, None)
        };
        let [data, index, summary, filter, merkle] = spans;

        let mut summary = Summary::from_bytes(&summary.read_all()?)
            .with_context(|| format!("bad summary in {}", dir.display()))?;
        if let Some(header) = &header {
            if header.min_key != summary.min_key || header.max_key != summary.max_key {
                bail!("header bounds disagree with summary in {}", dir.display());
            }
        }
        let bloom = BloomFilter::from_bytes(&filter.read_all()?)
            .with_context(|| format!("bad filter in {}", dir.display()))?;

        let dict_path = dir.join(DICTIONARY_FILE);
        let dictionary = if dict_path.exists() {
            let mut r = BufReader::new(File::open(&dict_path)?);
            Some(Arc::new(Dictionary::read_from(&mut r)?))
        } else {
            None
        };

        if let Some(d) = &dictionary {
            summary.min_key = d.decode(&summary.min_key)?.to_string();
            summary.max_key = d.decode(&summary.max_key)?.to_string();
            for entry in &mut summary.entries {
                entry.key = d.decode(&entry.key)?.to_string();
            }
        }
        if summary.entries.is_empty() {
            bail!("empty summary in {}", dir.display());
        }

        Ok(Self {
            dir,
            layout,
            data: Section::open(data)?,
            index: Section::open(index)?,
            merkle,
            bloom,
            summary,
            dictionary,
        })
    }

    fn logical_key<'a>(&'a self, stored: &'a str) -> Result<&'a str> {
        match &self.dictionary {
            Some(d) => d.decode(stored),
            None => Ok(stored),
        }
    }

    /// Data-section byte range `[start, end)` that holds `key` if the table
    /// holds it at all. `end == 0` means "to the end of the data section".
    fn locate(&self, key: &str) -> Result<(u64, u64)> {
        let entries = &self.summary.entries;
        let pos = entries.partition_point(|e| e.key.as_str() <= key);
        if pos == 0 {
            return Ok((0, 0));
        }
        let index_start = entries[pos - 1].offset;
        let index_end = entries.get(pos).map_or(0, |e| e.offset);

        let block = self.index.read_range(index_start, index_end)?;
        let mut start = 0;
        let mut end = None;
        for entry in read_entries(&block)? {
            if self.logical_key(&entry.key)? <= key {
                start = entry.offset;
            } else {
                end = Some(entry.offset);
                break;
            }
        }

        let end = match end {
            Some(offset) => offset,
            None if index_end == 0 => 0,
            // The first entry of the next summary block bounds the range.
            None => self.index.read_entry_at(index_end)?.offset,
        };
        Ok((start, end))
    }

    /// Point lookup for a single key.
    ///
    /// The key bounds and the bloom filter are checked first; a negative
    /// answer from either means the key is **definitely not** in this table
    /// and costs no disk I/O.
    ///
    /// Returns `Ok(Some(record))` if the key exists in this table (the record
    /// may be a tombstone). Returns `Ok(None)` if it does not.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure and a [`record::CodecError`] if the
    /// record bytes fail their checksum.
    pub fn find(&self, key: &str) -> Result<Option<Record>> {
        if key < self.summary.min_key.as_str() || key > self.summary.max_key.as_str() {
            return Ok(None);
        }
        // Fast path: bloom filter says "definitely not here"
        if !self.bloom.may_contain(key.as_bytes()) {
            return Ok(None);
        }

        let (start, end) = self.locate(key)?;
        let block = self.data.read_range(start, end)?;
        let mut cursor = &block[..];
        while !cursor.is_empty() {
            let (rec, used) = codec::decode(cursor)?;
            cursor = &cursor[used..];
            let ord = self.logical_key(&rec.key)?.cmp(key);
            match ord {
                Ordering::Less => continue,
                Ordering::Equal => return Ok(Some(self.restore(rec)?)),
                Ordering::Greater => return Ok(None),
            }
        }
        Ok(None)
    }

    pub(crate) fn restore(&self, rec: Record) -> Result<Record> {
        restore_key(self.dictionary.as_deref(), rec)
    }

    /// Data offset from which a scan for keys `>= lower_bound` must start.
    pub(crate) fn seek_offset(&self, lower_bound: &str) -> Result<u64> {
        if lower_bound <= self.summary.min_key.as_str() {
            return Ok(0);
        }
        if lower_bound > self.summary.max_key.as_str() {
            return Ok(self.data.span.len);
        }
        Ok(self.locate(lower_bound)?.0)
    }

    pub(crate) fn data_span(&self) -> &SectionSpan {
        &self.data.span
    }

    pub(crate) fn dictionary(&self) -> Option<Arc<Dictionary>> {
        self.dictionary.clone()
    }

    /// Rebuilds the hash tree from the data section and compares its root
    /// with the persisted tree.
    pub fn verify_integrity(&self) -> Result<bool> {
        Ok(self.corrupted_records()?.is_empty())
    }

    /// Positions of records whose bytes no longer match the persisted hash
    /// tree. If record boundaries themselves are damaged every position is
    /// reported.
    pub fn corrupted_records(&self) -> Result<Vec<usize>> {
        let stored = MerkleTree::from_bytes(&self.merkle.read_all()?)
            .with_context(|| format!("bad merkle section in {}", self.dir.display()))?;
        let data = self.data.read_range(0, 0)?;

        let mut builder = MerkleBuilder::new();
        let mut cursor = &data[..];
        while !cursor.is_empty() {
            match codec::peek_len(cursor) {
                Ok(len) => {
                    builder.push(&cursor[..len]);
                    cursor = &cursor[len..];
                }
                Err(e) => {
                    warn!(dir = %self.dir.display(), error = %e, "unreadable data section");
                    return Ok((0..stored.leaf_count().max(1)).collect());
                }
            }
        }

        let rebuilt = builder.finish();
        let mismatched = stored.mismatched_leaves(&rebuilt);
        if !mismatched.is_empty() {
            warn!(
                dir = %self.dir.display(),
                records = mismatched.len(),
                "sstable failed integrity check"
            );
        }
        Ok(mismatched)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.dictionary.is_some()
    }

    #[must_use]
    pub fn min_key(&self) -> &str {
        &self.summary.min_key
    }

    #[must_use]
    pub fn max_key(&self) -> &str {
        &self.summary.max_key
    }

    /// Largest record timestamp in the table, used to resume the engine clock.
    #[must_use]
    pub fn max_timestamp(&self) -> u64 {
        self.summary.max_timestamp
    }

    /// Number of records in the table, tombstones included.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.summary.record_count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.summary.record_count == 0
    }

    /// `true` if some key in `[min, max]` could live in this table.
    #[must_use]
    pub fn overlaps_range(&self, min: &str, max: &str) -> bool {
        min <= self.max_key() && max >= self.min_key()
    }

    /// `true` if some key starting with `prefix` could live in this table.
    #[must_use]
    pub fn overlaps_prefix(&self, prefix: &str) -> bool {
        self.max_key() >= prefix
            && (self.min_key() <= prefix || self.min_key().starts_with(prefix))
    }
}
