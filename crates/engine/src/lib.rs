//! # Engine - StrataKV Storage Engine
//!
//! The central orchestrator that ties together the [`wal`], [`memtable`] and
//! [`sstable`] crates into a complete LSM-tree key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────────────┐
//! │                       ENGINE                          │
//! │                                                       │
//! │ write.rs → WAL append → active memtable insert        │
//! │              |                                        │
//! │              |  (active memtable full?)               │
//! │              v                                        │
//! │           rotate → flushing queue                     │
//! │              |  (too many instances?)                 │
//! │              v                                        │
//! │           flush oldest → new SSTable at L0            │
//! │              |  (level count >= capacity?)            │
//! │              v                                        │
//! │           compaction.rs → check_level cascade         │
//! │                                                       │
//! │ read.rs → memtables → read cache → L0 → L1 → ...      │
//! │           (first match wins, tombstones hide keys)    │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                                 |
//! |----------------|---------------------------------------------------------|
//! | `lib.rs`       | `Engine` struct, errors, accessors, `Debug`, `Drop`     |
//! | `recovery`     | Manifest load, table loading, WAL replay, tmp cleanup   |
//! | `write`        | `put()`, `delete()`, `flush()`, rotation and retention  |
//! | `read`         | `get()`, `prefix_scan()`, `range_scan()`                |
//! | `compaction`   | `check_level()`, size-tiered and leveled compaction     |
//! | `manifest`     | Persistent level tracking (atomic file ops)             |
//! | `cache`        | Bounded read cache over `moka`                          |
//!
//! ## Crash Safety
//!
//! Every write is appended to the WAL **before** the memtable update. WAL
//! segments are only removed **after** every record they hold is in an
//! SSTable listed in the manifest. SSTables are written into a staging
//! directory and renamed into place; the manifest uses the same pattern.
mod cache;
mod compaction;
mod manifest;
mod read;
mod recovery;
mod write;

use anyhow::Result;
use config::EngineConfig;
use manifest::Manifest;
use memtable::MemtablePool;
use sstable::{SSTableReader, TableOptions};
use std::path::PathBuf;
use thiserror::Error;
use wal::Wal;

pub use cache::ReadCache;
pub use config::{CompactionKind, ConfigError, MemtableKind};
pub use manifest::{parse_table_name, table_name, MANIFEST_FILENAME};
pub use record::Record;

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = record::codec::MAX_KEY_BYTES;
/// Maximum allowed value size in bytes (10 MiB).
pub const MAX_VALUE_SIZE: usize = record::codec::MAX_VALUE_BYTES;

/// Engine-level failures that callers may want to match on. Everything else
/// travels as [`anyhow::Error`] with the typed leaf error underneath.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be opened (bad configuration, inaccessible
    /// directories, unreadable manifest or table).
    #[error("storage engine unavailable")]
    Unavailable,
}

/// A scan that failed part-way. `partial` holds the records of the requested
/// page gathered before the failure.
#[derive(Debug, Error)]
#[error("scan failed after {} records: {source}", .partial.len())]
pub struct ScanError {
    pub partial: Vec<Record>,
    #[source]
    pub source: anyhow::Error,
}

/// Point-in-time counters, mostly for tests and the CLI `stats` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Memtables held in memory, the active one included.
    pub memtables: usize,
    /// Records across all memtables.
    pub memtable_records: usize,
    /// Table count per level, level 0 first.
    pub tables_per_level: Vec<usize>,
    pub cache_entries: usize,
    pub wal_segments: usize,
    pub last_timestamp: u64,
}

/// The storage engine orchestrating WAL, memtable pool and SSTable levels.
///
/// # Write Path
///
/// 1. Rotate the active memtable if it is full; flush the oldest memtables
///    while more than `memtable_instances` are held.
/// 2. Take the next monotonic timestamp.
/// 3. Append the record to the WAL (crash-safe durability).
/// 4. Insert into the active memtable and drop the key from the read cache.
///
/// # Read Path
///
/// 1. Memtables, newest first (tombstones included).
/// 2. The read cache.
/// 3. SSTables level by level, newest first within a level.
///
/// # Concurrency
///
/// Mutations take `&mut self`, reads take `&self`; the engine is `Sync`, so
/// callers share it behind an `RwLock`.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) table_options: TableOptions,
    pub(crate) sst_dir: PathBuf,
    pub(crate) wal: Wal,
    pub(crate) pool: MemtablePool,
    /// `levels[i]` holds the tables of level `i`, newest first (leveled
    /// compaction keeps levels above 0 sorted by min key instead).
    pub(crate) levels: Vec<Vec<SSTableReader>>,
    pub(crate) manifest: Manifest,
    pub(crate) cache: ReadCache,
    /// Highest timestamp handed out or recovered.
    pub(crate) last_timestamp: u64,
    /// Highest table generation in use.
    pub(crate) generation: u64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.config.data_dir)
            .field("compaction", &self.config.compaction_kind)
            .field("memtable_kind", &self.config.memtable_kind)
            .field("memtables", &self.pool.instances())
            .field("memtable_records", &self.pool.total_records())
            .field("wal_segment", &self.wal.active_segment())
            .field(
                "tables_per_level",
                &self.levels.iter().map(Vec::len).collect::<Vec<_>>(),
            )
            .field("last_timestamp", &self.last_timestamp)
            .finish()
    }
}

impl Engine {
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of tables at `level` (0 for levels beyond the maximum depth).
    #[must_use]
    pub fn level_len(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, Vec::len)
    }

    /// Total number of tables across all levels.
    #[must_use]
    pub fn sstable_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Highest timestamp assigned so far.
    #[must_use]
    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    pub fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            memtables: self.pool.instances(),
            memtable_records: self.pool.total_records(),
            tables_per_level: self.levels.iter().map(Vec::len).collect(),
            cache_entries: self.cache.len(),
            wal_segments: self.wal.segments()?.len(),
            last_timestamp: self.last_timestamp,
        })
    }

    /// Checks every table's integrity tree against its data block and returns
    /// the directories of the tables that fail.
    pub fn verify_tables(&self) -> Result<Vec<PathBuf>> {
        let mut damaged = Vec::new();
        for table in self.levels.iter().flatten() {
            if !table.verify_integrity()? {
                damaged.push(table.dir().to_path_buf());
            }
        }
        Ok(damaged)
    }
}

/// Best-effort flush on drop.
///
/// Memtable contents are written to SSTables so they are not left to WAL
/// replay. Errors are ignored because Drop cannot propagate them; the data is
/// still in the WAL and will be recovered on the next startup.
impl Drop for Engine {
    fn drop(&mut self) {
        if !self.pool.is_empty() {
            let _ = self.flush();
        }
    }
}

#[cfg(test)]
mod tests;
