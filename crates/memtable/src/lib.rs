//! # Memtable
//!
//! The in-memory write buffer of StrataKV. A memtable maps keys to the latest
//! [`Record`] written for them. Deletes are stored as tombstone records so a
//! delete can shadow older data that already lives in SSTables.
//!
//! Three interchangeable backings are available, chosen once per engine:
//!
//! - [`MemtableKind::BTree`]: arena-allocated B-tree of configurable order
//! - [`MemtableKind::SkipList`]: arena-allocated skip list
//! - [`MemtableKind::HashMap`]: unordered map, sorted on iteration
//!
//! Within a memtable the last write wins by insertion order. The engine hands
//! out monotonically increasing timestamps, so insertion order and timestamp
//! order agree.

mod btree;
mod hash;
mod pool;
mod skiplist;

pub use btree::BTree;
pub use config::MemtableKind;
pub use hash::HashTable;
pub use pool::{MemtablePool, PooledMemtable};
pub use skiplist::SkipList;

use record::{Record, RecordIterator};
use std::fmt;

/// Structural parameters for the backings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemtableParams {
    pub btree_order: usize,
    pub skiplist_max_height: usize,
}

impl Default for MemtableParams {
    fn default() -> Self {
        Self {
            btree_order: 16,
            skiplist_max_height: 12,
        }
    }
}

#[derive(Clone)]
enum Store {
    BTree(BTree),
    SkipList(SkipList),
    Hash(HashTable),
}

#[derive(Clone)]
pub struct Memtable {
    store: Store,
    /// Sum of key and value bytes of the stored records.
    approx_size: usize,
}

impl Memtable {
    pub fn new(kind: MemtableKind, params: MemtableParams) -> Self {
        let store = match kind {
            MemtableKind::BTree => Store::BTree(BTree::new(params.btree_order)),
            MemtableKind::SkipList => Store::SkipList(SkipList::new(params.skiplist_max_height)),
            MemtableKind::HashMap => Store::Hash(HashTable::new()),
        };
        Self {
            store,
            approx_size: 0,
        }
    }

    pub fn kind(&self) -> MemtableKind {
        match self.store {
            Store::BTree(_) => MemtableKind::BTree,
            Store::SkipList(_) => MemtableKind::SkipList,
            Store::Hash(_) => MemtableKind::HashMap,
        }
    }

    /// Stores `record`, replacing whatever was stored under its key.
    pub fn insert(&mut self, record: Record) {
        self.approx_size += record.key.len() + record.value.len();
        let replaced = match &mut self.store {
            Store::BTree(t) => t.insert(record),
            Store::SkipList(t) => t.insert(record),
            Store::Hash(t) => t.insert(record),
        };
        if let Some(old) = replaced {
            self.approx_size = self
                .approx_size
                .saturating_sub(old.key.len() + old.value.len());
        }
    }

    /// Logical delete: stores a tombstone for `key`, overwriting any live
    /// record in place. Nothing is ever physically removed.
    pub fn delete(&mut self, key: &str, timestamp: u64) {
        self.insert(Record::tombstone(key, timestamp));
    }

    /// The record stored under `key`, tombstones included.
    pub fn find(&self, key: &str) -> Option<&Record> {
        match &self.store {
            Store::BTree(t) => t.get(key),
            Store::SkipList(t) => t.get(key),
            Store::Hash(t) => t.get(key),
        }
    }

    /// Live value for `key`, `None` if absent or deleted.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.find(key).and_then(Record::live_value)
    }

    pub fn len(&self) -> usize {
        match &self.store {
            Store::BTree(t) => t.len(),
            Store::SkipList(t) => t.len(),
            Store::Hash(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` once the memtable holds `capacity` records.
    pub fn is_full(&self, capacity: usize) -> bool {
        self.len() >= capacity
    }

    pub fn approx_size(&self) -> usize {
        self.approx_size
    }

    /// Every record in key order, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = &Record> + '_ {
        let sorted = match &self.store {
            Store::BTree(t) => t.sorted(),
            Store::SkipList(t) => t.sorted(),
            Store::Hash(t) => t.sorted(),
        };
        sorted.into_iter()
    }

    /// Largest timestamp stored, `0` when empty.
    pub fn max_timestamp(&self) -> u64 {
        self.iter().map(|r| r.timestamp).max().unwrap_or(0)
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new(MemtableKind::SkipList, MemtableParams::default())
    }
}

impl fmt::Debug for Memtable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memtable")
            .field("kind", &self.kind())
            .field("len", &self.len())
            .field("approx_size", &self.approx_size)
            .finish()
    }
}

/// Ordered cursor over a snapshot of one memtable.
///
/// The snapshot is taken and sorted once at construction, so the memtable can
/// keep changing while the iterator is alive.
#[derive(Debug)]
pub struct MemtableIterator {
    records: Vec<Record>,
    pos: usize,
}

impl MemtableIterator {
    /// Snapshot of `memtable`, starting at the first key `>= lower_bound`.
    pub fn new(memtable: &Memtable, lower_bound: Option<&str>) -> Self {
        let records: Vec<Record> = memtable
            .iter()
            .filter(|r| lower_bound.map_or(true, |lb| r.key.as_str() >= lb))
            .cloned()
            .collect();
        Self { records, pos: 0 }
    }
}

impl RecordIterator for MemtableIterator {
    fn next_entry(&mut self) -> anyhow::Result<Option<Record>> {
        let next = self.records.get(self.pos).cloned();
        if next.is_some() {
            self.pos += 1;
        }
        Ok(next)
    }

    fn stop(&mut self) {
        self.records.clear();
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests;
