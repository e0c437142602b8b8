//! Cursors over a single table and the filtered views used by scans.

use anyhow::Result;
use record::{codec, Record, RecordIterator};
use std::fs::File;
use std::io::{BufReader, Take};
use std::sync::Arc;

use crate::dictionary::Dictionary;
use crate::merge::IteratorGroup;
use crate::reader::restore_key;
use crate::SSTableReader;

/// Sequential walk over a table's data section.
///
/// The iterator owns its own file handle, independent of the reader's, and
/// holds it until the section end or [`stop`](RecordIterator::stop). It must
/// not outlive a compaction that removes the table directory.
#[derive(Debug)]
pub struct SSTableIterator {
    stream: Option<Take<BufReader<File>>>,
    dictionary: Option<Arc<Dictionary>>,
    /// Records below this key are skipped (the index only gets us close).
    lower_bound: Option<String>,
}

impl SSTableIterator {
    /// Starts at the first record `>= lower_bound`, or at the first record
    /// of the table.
    pub fn open(reader: &SSTableReader, lower_bound: Option<&str>) -> Result<Self> {
        let start = match lower_bound {
            Some(lb) => reader.seek_offset(lb)?,
            None => 0,
        };
        Ok(Self {
            stream: Some(reader.data_span().open_at(start)?),
            dictionary: reader.dictionary(),
            lower_bound: lower_bound.map(str::to_string),
        })
    }
}

impl RecordIterator for SSTableIterator {
    fn next_entry(&mut self) -> Result<Option<Record>> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };
            let rec = match codec::read_from(stream) {
                Ok(Some(rec)) => restore_key(self.dictionary.as_deref(), rec)?,
                Ok(None) => {
                    self.stop();
                    return Ok(None);
                }
                Err(e) => {
                    self.stop();
                    return Err(e.into());
                }
            };
            if let Some(lb) = &self.lower_bound {
                if rec.key < *lb {
                    continue;
                }
                self.lower_bound = None;
            }
            return Ok(Some(rec));
        }
    }

    fn stop(&mut self) {
        self.stream = None;
    }
}

/// Live records whose key starts with a prefix.
///
/// Records below the prefix are skipped; the first record past it ends the
/// stream and is discarded. Tombstones are filtered out here, after the
/// merge has let them shadow older versions.
pub struct PrefixIterator {
    group: IteratorGroup,
    prefix: String,
    done: bool,
}

impl PrefixIterator {
    pub fn new(group: IteratorGroup, prefix: impl Into<String>) -> Self {
        Self {
            group,
            prefix: prefix.into(),
            done: false,
        }
    }
}

impl RecordIterator for PrefixIterator {
    fn next_entry(&mut self) -> Result<Option<Record>> {
        while !self.done {
            let next = match self.group.next_entry() {
                Ok(next) => next,
                Err(e) => {
                    self.stop();
                    return Err(e);
                }
            };
            match next {
                None => self.stop(),
                Some(rec) if rec.key.as_str() < self.prefix.as_str() => continue,
                Some(rec) if !rec.key.starts_with(&self.prefix) => self.stop(),
                Some(rec) if rec.tombstone => continue,
                Some(rec) => return Ok(Some(rec)),
            }
        }
        Ok(None)
    }

    fn stop(&mut self) {
        self.done = true;
        self.group.stop();
    }
}

/// Live records with `min <= key <= max`.
pub struct RangeIterator {
    group: IteratorGroup,
    min: String,
    max: String,
    done: bool,
}

impl RangeIterator {
    pub fn new(group: IteratorGroup, min: impl Into<String>, max: impl Into<String>) -> Self {
        let (min, max) = (min.into(), max.into());
        let done = min > max;
        let mut it = Self {
            group,
            min,
            max,
            done: false,
        };
        if done {
            it.stop();
        }
        it
    }
}

impl RecordIterator for RangeIterator {
    fn next_entry(&mut self) -> Result<Option<Record>> {
        while !self.done {
            let next = match self.group.next_entry() {
                Ok(next) => next,
                Err(e) => {
                    self.stop();
                    return Err(e);
                }
            };
            match next {
                None => self.stop(),
                Some(rec) if rec.key < self.min => continue,
                Some(rec) if rec.key > self.max => self.stop(),
                Some(rec) if rec.tombstone => continue,
                Some(rec) => return Ok(Some(rec)),
            }
        }
        Ok(None)
    }

    fn stop(&mut self) {
        self.done = true;
        self.group.stop();
    }
}
