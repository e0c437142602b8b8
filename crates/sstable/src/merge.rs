//! K-way merge over ordered record sources.
//!
//! [`IteratorGroup`] produces records in ascending key order. When the same
//! key appears in several sources only the record with the **highest
//! timestamp** is emitted; on equal timestamps the source listed first wins,
//! so callers list sources newest first. Tombstones pass through.
//!
//! This is the shared primitive for scans and for compaction: walk N inputs
//! in sorted order, deduplicate, and either filter the result or write it to
//! a new SSTable.

use anyhow::Result;
use record::{Record, RecordIterator};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::iter::SSTableIterator;
use crate::SSTableReader;

/// A pending key from one source, used for heap-based merge ordering.
struct HeapEntry {
    key: String,
    /// Index into the `sources` / `heads` arrays.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the *smallest* key first,
        // so reverse the key comparison. On tie, the lower source index.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges any number of sorted sources into one sorted, deduplicated stream.
pub struct IteratorGroup {
    sources: Vec<Box<dyn RecordIterator>>,
    /// Current record of each source, taken when its key reaches the top.
    heads: Vec<Option<Record>>,
    heap: BinaryHeap<HeapEntry>,
    /// Sources whose head was handed out and must be refilled before the
    /// next record. Refilling lazily keeps a read error from discarding a
    /// record that was already decoded.
    pending: Vec<usize>,
    primed: bool,
}

impl IteratorGroup {
    pub fn new(sources: Vec<Box<dyn RecordIterator>>) -> Self {
        let heads = sources.iter().map(|_| None).collect();
        Self {
            sources,
            heads,
            heap: BinaryHeap::new(),
            pending: Vec::new(),
            primed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Pulls the next record of `source` into its head slot.
    fn advance(&mut self, source: usize) -> Result<()> {
        match self.sources[source].next_entry()? {
            Some(rec) => {
                self.heap.push(HeapEntry {
                    key: rec.key.clone(),
                    source,
                });
                self.heads[source] = Some(rec);
            }
            None => self.heads[source] = None,
        }
        Ok(())
    }

    fn prime(&mut self) -> Result<()> {
        if !self.primed {
            self.primed = true;
            for source in 0..self.sources.len() {
                self.advance(source)?;
            }
        }
        Ok(())
    }

    fn refill(&mut self) -> Result<()> {
        while let Some(source) = self.pending.pop() {
            self.advance(source)?;
        }
        Ok(())
    }
}

impl RecordIterator for IteratorGroup {
    fn next_entry(&mut self) -> Result<Option<Record>> {
        self.prime()?;
        self.refill()?;

        let Some(top) = self.heap.pop() else {
            return Ok(None);
        };
        let mut best = self.heads[top.source].take();
        self.pending.push(top.source);

        // Drain every source currently exposing the same key, keeping the
        // newest record. Sources are popped in index order on equal keys.
        // Each source holds a key once, so none needs a refill to finish.
        while self.heap.peek().map_or(false, |e| e.key == top.key) {
            let Some(dup) = self.heap.pop() else { break };
            let candidate = self.heads[dup.source].take();
            self.pending.push(dup.source);
            best = match (best, candidate) {
                (Some(b), Some(c)) if c.timestamp > b.timestamp => Some(c),
                (Some(b), _) => Some(b),
                (None, c) => c,
            };
        }
        Ok(best)
    }

    fn stop(&mut self) {
        for source in &mut self.sources {
            source.stop();
        }
        self.heap.clear();
        self.pending.clear();
        self.heads.iter_mut().for_each(|h| *h = None);
    }
}

impl Drop for IteratorGroup {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Compaction stream: the merged contents of a set of tables.
pub struct MergeStream {
    group: IteratorGroup,
    drop_tombstones: bool,
}

impl RecordIterator for MergeStream {
    fn next_entry(&mut self) -> Result<Option<Record>> {
        loop {
            match self.group.next_entry()? {
                Some(rec) if rec.tombstone && self.drop_tombstones => continue,
                other => return Ok(other),
            }
        }
    }

    fn stop(&mut self) {
        self.group.stop();
    }
}

impl Iterator for MergeStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

/// Opens one iterator per table (listed newest first) and merges them.
/// With `drop_tombstones` the stream omits deleted keys entirely; only pass
/// it when no table outside `readers` can hold an older version of a key.
pub fn merge_tables(readers: &[&SSTableReader], drop_tombstones: bool) -> Result<MergeStream> {
    let mut sources: Vec<Box<dyn RecordIterator>> = Vec::with_capacity(readers.len());
    for reader in readers {
        sources.push(Box::new(SSTableIterator::open(reader, None)?));
    }
    Ok(MergeStream {
        group: IteratorGroup::new(sources),
        drop_tombstones,
    })
}

/// Drains a record iterator into a `Vec`.
pub fn collect_all<I: RecordIterator + ?Sized>(iter: &mut I) -> Result<Vec<Record>> {
    let mut out = Vec::new();
    while let Some(rec) = iter.next_entry()? {
        out.push(rec);
    }
    Ok(out)
}
