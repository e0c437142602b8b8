use anyhow::{bail, Context, Result};
use bloom::BloomFilter;
use memtable::Memtable;
use merkle::MerkleBuilder;
use record::{codec, Record};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::dictionary::Dictionary;
use crate::format::{
    write_entry, IndexEntry, Layout, Summary, TableHeader, TableOptions, DATA_FILE,
    DICTIONARY_FILE, FILTER_FILE, INDEX_FILE, MERKLE_FILE, SUMMARY_FILE, TABLE_FILE,
};

/// Facts about a freshly written table. Keys are the original (uncompressed)
/// keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    pub dir: PathBuf,
    pub min_key: String,
    pub max_key: String,
    pub record_count: u64,
    pub max_timestamp: u64,
}

/// Writes sorted records to disk as an immutable SSTable directory.
///
/// The writer is stateless. The write is crash-safe: every section is first
/// written into `<dir>.tmp`, fsynced, and the directory is then atomically
/// renamed to `dir`.
pub struct SSTableWriter {}

impl SSTableWriter {
    /// Flushes `mem` to a new table at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the memtable is empty (writing an empty SSTable is
    /// not useful and likely indicates a logic bug) or on any I/O failure.
    pub fn write_memtable(dir: &Path, mem: &Memtable, options: &TableOptions) -> Result<TableMeta> {
        if mem.is_empty() {
            bail!("refusing to write an empty SSTable (empty memtable)");
        }
        Self::create(dir, mem.iter().cloned().map(Ok), mem.len(), options)
    }

    /// Writes a table from a stream of records.
    ///
    /// This is the **streaming compaction** entry point: records are consumed
    /// one at a time and written directly to disk, keeping memory usage
    /// proportional to the bloom filter, index and hash tree, not the data.
    ///
    /// # Arguments
    ///
    /// * `dir` - destination table directory, must not exist yet.
    /// * `records` - records in **strictly ascending key order**. The caller is
    ///   responsible for deduplication. The first error aborts the write.
    /// * `expected` - estimated record count, used to size the bloom filter.
    ///   Over-estimating is safe; under-estimating increases the FPR.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is empty or out of order, if `dir`
    /// already exists, or on I/O failure. Nothing is left behind on error.
    pub fn create<I>(dir: &Path, records: I, expected: usize, options: &TableOptions) -> Result<TableMeta>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        if dir.exists() {
            bail!("sstable {} already exists", dir.display());
        }
        let tmp = tmp_dir(dir);
        if tmp.exists() {
            fs::remove_dir_all(&tmp)?;
        }
        fs::create_dir_all(&tmp)?;

        let meta = match write_sections(&tmp, records, expected, options) {
            Ok(meta) => meta,
            Err(e) => {
                let _ = fs::remove_dir_all(&tmp);
                return Err(e);
            }
        };

        // Atomically move into place
        fs::rename(&tmp, dir)
            .with_context(|| format!("failed to install sstable {}", dir.display()))?;
        sync_dir(dir.parent());

        debug!(
            dir = %dir.display(),
            records = meta.record_count,
            layout = ?options.layout(),
            compression = options.compression,
            "sstable written"
        );
        Ok(TableMeta {
            dir: dir.to_path_buf(),
            ..meta
        })
    }
}

/// Staging directory used while `dir` is being written.
pub fn tmp_dir(dir: &Path) -> PathBuf {
    let mut name = dir.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    dir.with_file_name(name)
}

/// Fsync a directory so a rename inside it is durable. Best effort: some
/// platforms cannot open directories.
fn sync_dir(dir: Option<&Path>) {
    if let Some(dir) = dir {
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
    }
}

/// Buffered section file that counts the bytes written.
struct SectionWriter {
    file: BufWriter<File>,
    written: u64,
}

impl SectionWriter {
    fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file: BufWriter::new(file),
            written: 0,
        })
    }

    fn finish(mut self) -> Result<u64> {
        self.file.flush()?;
        self.file.into_inner()?.sync_all()?;
        Ok(self.written)
    }
}

impl Write for SectionWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn write_sections<I>(tmp: &Path, records: I, expected: usize, options: &TableOptions) -> Result<TableMeta>
where
    I: IntoIterator<Item = Result<Record>>,
{
    let index_degree = options.index_degree.max(1) as u64;
    let summary_degree = options.summary_degree.max(1);

    let mut data = SectionWriter::create(&tmp.join(DATA_FILE))?;
    let mut bloom = BloomFilter::new(expected.max(1), options.bloom_fpr);
    let mut merkle = MerkleBuilder::new();
    let mut dictionary = options.compression.then(Dictionary::new);
    let mut index: Vec<IndexEntry> = Vec::new();

    // (logical key, stored key) of the first and last record
    let mut first: Option<(String, String)> = None;
    let mut last: Option<(String, String)> = None;
    let mut count = 0u64;
    let mut max_timestamp = 0u64;
    // Reusable buffer for encoding records.
    let mut buf: Vec<u8> = Vec::with_capacity(256);

    // Write DATA section
    for rec in records {
        let rec = rec?;
        if let Some((last_key, _)) = &last {
            if rec.key <= *last_key {
                bail!("records out of order: {:?} after {:?}", rec.key, last_key);
            }
        }

        bloom.insert(rec.key.as_bytes());
        let logical = rec.key.clone();
        let stored = match dictionary.as_mut() {
            Some(d) => rec.with_key(d.push(&logical)),
            None => rec,
        };

        buf.clear();
        codec::encode_into(&stored, &mut buf);
        if count % index_degree == 0 {
            index.push(IndexEntry {
                key: stored.key.clone(),
                offset: data.written,
            });
        }
        data.write_all(&buf)?;
        merkle.push(&buf);

        max_timestamp = max_timestamp.max(stored.timestamp);
        count += 1;
        if first.is_none() {
            first = Some((logical.clone(), stored.key.clone()));
        }
        last = Some((logical, stored.key));
    }

    let (Some((min_key, stored_min)), Some((max_key, stored_max))) = (first, last) else {
        bail!("refusing to write an empty SSTable (no records)");
    };
    data.finish()?;

    // Write INDEX section, sampling every Mth entry into the summary
    let mut index_file = SectionWriter::create(&tmp.join(INDEX_FILE))?;
    let mut summary_entries = Vec::with_capacity(index.len() / summary_degree + 1);
    for (i, entry) in index.iter().enumerate() {
        if i % summary_degree == 0 {
            summary_entries.push(IndexEntry {
                key: entry.key.clone(),
                offset: index_file.written,
            });
        }
        write_entry(&mut index_file, entry)?;
    }
    index_file.finish()?;

    // Write SUMMARY section
    let summary = Summary {
        min_key: stored_min,
        max_key: stored_max,
        max_timestamp,
        record_count: count,
        entries: summary_entries,
    };
    let mut summary_file = SectionWriter::create(&tmp.join(SUMMARY_FILE))?;
    summary.write_to(&mut summary_file)?;
    summary_file.finish()?;

    // Write FILTER and MERKLE sections
    let mut filter_file = SectionWriter::create(&tmp.join(FILTER_FILE))?;
    bloom.write_to(&mut filter_file)?;
    filter_file.finish()?;

    let mut merkle_file = SectionWriter::create(&tmp.join(MERKLE_FILE))?;
    merkle.finish().write_to(&mut merkle_file)?;
    merkle_file.finish()?;

    if let Some(dictionary) = &dictionary {
        let mut dict_file = SectionWriter::create(&tmp.join(DICTIONARY_FILE))?;
        dictionary.write_to(&mut dict_file)?;
        dict_file.finish()?;
    }

    if options.layout() == Layout::SingleFile {
        combine_sections(tmp, &summary.min_key, &summary.max_key)?;
    }

    Ok(TableMeta {
        dir: tmp.to_path_buf(),
        min_key,
        max_key,
        record_count: count,
        max_timestamp,
    })
}

/// Concatenates the five section files behind a header into `table.db` and
/// removes the section files.
fn combine_sections(tmp: &Path, stored_min: &str, stored_max: &str) -> Result<()> {
    let sections = [DATA_FILE, INDEX_FILE, SUMMARY_FILE, FILTER_FILE, MERKLE_FILE];
    let mut offsets = [0u64; 5];
    let mut next = TableHeader::encoded_len(stored_min, stored_max);
    for (i, name) in sections.iter().enumerate() {
        offsets[i] = next;
        next += fs::metadata(tmp.join(name))?.len();
    }

    let header = TableHeader {
        min_key: stored_min.to_string(),
        max_key: stored_max.to_string(),
        data_offset: offsets[0],
        index_offset: offsets[1],
        summary_offset: offsets[2],
        filter_offset: offsets[3],
        merkle_offset: offsets[4],
    };

    let mut table = SectionWriter::create(&tmp.join(TABLE_FILE))?;
    header.write_to(&mut table)?;
    for name in sections {
        let mut section = File::open(tmp.join(name))?;
        io::copy(&mut section, &mut table)?;
    }
    let total = table.finish()?;
    if total != next {
        bail!("single-file table size {} does not match header ({})", total, next);
    }

    for name in sections {
        fs::remove_file(tmp.join(name))?;
    }
    Ok(())
}
