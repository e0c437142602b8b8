use crate::{Memtable, MemtableIterator, MemtableKind, MemtableParams};
use record::Record;
use std::collections::VecDeque;

/// A memtable together with the first WAL segment holding its records.
#[derive(Debug, Clone)]
pub struct PooledMemtable {
    pub memtable: Memtable,
    pub wal_segment: u64,
}

/// One active memtable plus the rotated-out ones waiting to be flushed.
///
/// Reads consult the active memtable first, then the flushing queue from
/// newest to oldest. At most `max_instances` memtables are meant to be held;
/// [`needs_flush`](Self::needs_flush) says when the oldest must be written out.
#[derive(Debug)]
pub struct MemtablePool {
    kind: MemtableKind,
    params: MemtableParams,
    capacity: usize,
    max_instances: usize,
    active: PooledMemtable,
    /// Oldest at the front.
    flushing: VecDeque<PooledMemtable>,
}

impl MemtablePool {
    pub fn new(
        kind: MemtableKind,
        params: MemtableParams,
        capacity: usize,
        max_instances: usize,
        wal_segment: u64,
    ) -> Self {
        Self {
            kind,
            params,
            capacity: capacity.max(1),
            max_instances: max_instances.max(1),
            active: PooledMemtable {
                memtable: Memtable::new(kind, params),
                wal_segment,
            },
            flushing: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, record: Record) {
        self.active.memtable.insert(record);
    }

    /// Newest record for `key` across all memtables, tombstones included.
    pub fn find(&self, key: &str) -> Option<&Record> {
        self.active
            .memtable
            .find(key)
            .or_else(|| self.flushing.iter().rev().find_map(|m| m.memtable.find(key)))
    }

    /// `true` when the active memtable is full and must rotate before the
    /// next write.
    pub fn needs_rotation(&self) -> bool {
        self.active.memtable.is_full(self.capacity)
    }

    /// `true` while more than `max_instances` memtables are held.
    pub fn needs_flush(&self) -> bool {
        self.flushing.len() + 1 > self.max_instances
    }

    /// Moves the active memtable to the flushing queue and starts a new one
    /// whose records begin in WAL segment `wal_segment`.
    pub fn rotate(&mut self, wal_segment: u64) {
        let fresh = PooledMemtable {
            memtable: Memtable::new(self.kind, self.params),
            wal_segment,
        };
        let old = std::mem::replace(&mut self.active, fresh);
        if !old.memtable.is_empty() {
            self.flushing.push_back(old);
        }
    }

    pub fn oldest_flushing(&self) -> Option<&PooledMemtable> {
        self.flushing.front()
    }

    pub fn pop_oldest_flushing(&mut self) -> Option<PooledMemtable> {
        self.flushing.pop_front()
    }

    /// Oldest WAL segment still needed by a memtable held in memory.
    pub fn oldest_wal_segment(&self) -> u64 {
        self.flushing
            .front()
            .map_or(self.active.wal_segment, |m| m.wal_segment)
    }

    /// One snapshot iterator per memtable, newest first.
    pub fn iterators(&self, lower_bound: Option<&str>) -> Vec<MemtableIterator> {
        std::iter::once(&self.active)
            .chain(self.flushing.iter().rev())
            .map(|m| MemtableIterator::new(&m.memtable, lower_bound))
            .collect()
    }

    pub fn active(&self) -> &PooledMemtable {
        &self.active
    }

    /// Number of memtables held, the active one included.
    pub fn instances(&self) -> usize {
        self.flushing.len() + 1
    }

    /// Records across all memtables, shadowed versions counted separately.
    pub fn total_records(&self) -> usize {
        self.active.memtable.len() + self.flushing.iter().map(|m| m.memtable.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.active.memtable.is_empty() && self.flushing.is_empty()
    }
}
