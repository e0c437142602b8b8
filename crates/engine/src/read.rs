/// Read path: `get()`, `prefix_scan()` and `range_scan()`.
///
/// Point lookups check the memtables first (freshest data), then the read
/// cache, then the SSTable levels from level 0 down, newest first within a
/// level. The first record found wins; tombstones shadow older values.
///
/// Scans compose one iterator per memtable and per overlapping table into an
/// [`IteratorGroup`], which resolves duplicates by timestamp, and filter the
/// merged stream through a [`PrefixIterator`] or [`RangeIterator`].
use anyhow::Result;
use record::{Record, RecordIterator};
use sstable::{IteratorGroup, PrefixIterator, RangeIterator, SSTableIterator, SSTableReader};

use crate::{Engine, ScanError};

impl Engine {
    /// Looks up `key`, returning its value if it is live.
    ///
    /// # Errors
    ///
    /// Returns an error if an SSTable read fails (corruption, I/O).
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        // 1. Memtables, newest first (tombstones included)
        if let Some(rec) = self.pool.find(key) {
            return Ok(rec.live_value().map(<[u8]>::to_vec));
        }

        // 2. Cache of values previously read from SSTables
        if let Some(value) = self.cache.get(key) {
            return Ok(Some(value));
        }

        // 3. SSTables, level by level
        for table in self.levels.iter().flatten() {
            if let Some(rec) = table.find(key)? {
                let value = rec.live_value().map(<[u8]>::to_vec);
                if let Some(v) = &value {
                    self.cache.add(key, v.clone());
                }
                return Ok(value);
            }
        }
        Ok(None)
    }

    /// Page `page` (1-based) of the live records whose key starts with
    /// `prefix`, `page_size` records per page, in ascending key order.
    ///
    /// `page` or `page_size` of 0 yields an empty result.
    ///
    /// # Errors
    ///
    /// On a mid-stream failure the [`ScanError`] carries the records of the
    /// page gathered so far.
    pub fn prefix_scan(&self, prefix: &str, page: usize, page_size: usize) -> Result<Vec<Record>, ScanError> {
        if page < 1 || page_size < 1 {
            return Ok(Vec::new());
        }
        let group = self
            .scan_sources(prefix, |t| t.overlaps_prefix(prefix))
            .map_err(|source| ScanError {
                partial: Vec::new(),
                source,
            })?;
        paginate(PrefixIterator::new(group, prefix), page, page_size)
    }

    /// Page `page` (1-based) of the live records with `min <= key <= max`.
    pub fn range_scan(&self, min: &str, max: &str, page: usize, page_size: usize) -> Result<Vec<Record>, ScanError> {
        if page < 1 || page_size < 1 || min > max {
            return Ok(Vec::new());
        }
        let group = self
            .scan_sources(min, |t| t.overlaps_range(min, max))
            .map_err(|source| ScanError {
                partial: Vec::new(),
                source,
            })?;
        paginate(RangeIterator::new(group, min, max), page, page_size)
    }

    /// One iterator per memtable and per wanted table, newest first, all
    /// starting at `lower_bound`.
    fn scan_sources<F>(&self, lower_bound: &str, wanted: F) -> Result<IteratorGroup>
    where
        F: Fn(&SSTableReader) -> bool,
    {
        let mut sources: Vec<Box<dyn RecordIterator>> = Vec::new();
        for it in self.pool.iterators(Some(lower_bound)) {
            sources.push(Box::new(it));
        }
        for table in self.levels.iter().flatten().filter(|t| wanted(*t)) {
            sources.push(Box::new(SSTableIterator::open(table, Some(lower_bound))?));
        }
        Ok(IteratorGroup::new(sources))
    }
}

/// Skips `(page - 1) * page_size` records, then collects up to `page_size`.
/// The iterator is stopped on every exit path.
fn paginate<I: RecordIterator>(mut iter: I, page: usize, page_size: usize) -> Result<Vec<Record>, ScanError> {
    let mut out = Vec::new();
    let result = fill_page(&mut iter, (page - 1).saturating_mul(page_size), page_size, &mut out);
    iter.stop();
    match result {
        Ok(()) => Ok(out),
        Err(source) => Err(ScanError {
            partial: out,
            source,
        }),
    }
}

fn fill_page<I: RecordIterator>(iter: &mut I, skip: usize, page_size: usize, out: &mut Vec<Record>) -> Result<()> {
    for _ in 0..skip {
        if iter.next_entry()?.is_none() {
            return Ok(());
        }
    }
    while out.len() < page_size {
        match iter.next_entry()? {
            Some(rec) => out.push(rec),
            None => break,
        }
    }
    Ok(())
}
