use crate::*;
use anyhow::Result;
use memtable::Memtable;
use record::Record;
use std::path::Path;


/// (single_file, compression) for every table shape.
pub(super) const SHAPES: [(bool, bool); 4] = [(false, false), (false, true), (true, false), (true, true)];

/// Small degrees so that even short tables have several index and summary
/// blocks.
pub(super) fn opts(single_file: bool, compression: bool) -> TableOptions {
    TableOptions {
        single_file,
        compression,
        index_degree: 2,
        summary_degree: 2,
        bloom_fpr: 0.01,
    }
}

/// Builds a memtable from `(key, value, timestamp)`; `None` is a tombstone.
pub(super) fn memtable_of(entries: &[(&str, Option<&str>, u64)]) -> Memtable {
    let mut m = Memtable::default();
    for &(key, value, ts) in entries {
        match value {
            Some(v) => m.insert(Record::live(key, v.as_bytes().to_vec(), ts)),
            None => m.delete(key, ts),
        }
    }
    m
}

pub(super) fn write_table(
    root: &Path,
    name: &str,
    entries: &[(&str, Option<&str>, u64)],
    options: &TableOptions,
) -> Result<SSTableReader> {
    let dir = root.join(name);
    SSTableWriter::write_memtable(&dir, &memtable_of(entries), options)?;
    SSTableReader::open(&dir)
}

/// `count` live records `key000..`, with timestamps starting at 1.
pub(super) fn numbered(count: usize) -> Vec<(String, String, u64)> {
    (0..count)
        .map(|i| (format!("key{:03}", i), format!("value{}", i), i as u64 + 1))
        .collect()
}

pub(super) fn write_numbered(root: &Path, name: &str, count: usize, options: &TableOptions) -> Result<SSTableReader> {
    let rows = numbered(count);
    let entries: Vec<(&str, Option<&str>, u64)> = rows
        .iter()
        .map(|(k, v, ts)| (k.as_str(), Some(v.as_str()), *ts))
        .collect();
    write_table(root, name, &entries, options)
}

pub(super) fn keys_of(records: &[Record]) -> Vec<&str> {
    records.iter().map(|r| r.key.as_str()).collect()
}
