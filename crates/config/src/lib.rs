//! # Config - StrataKV engine configuration
//!
//! A single [`EngineConfig`] value carries every tunable of the engine. It
//! can be built in code (defaults plus `with_*` setters) or read from the
//! environment with [`EngineConfig::from_env`]:
//!
//! ```text
//! STRATA_DATA_DIR             root directory               (default: "data")
//! STRATA_WAL_SEGMENT_BYTES    WAL segment byte budget      (default: 1048576)
//! STRATA_WAL_SYNC             fsync every WAL append       (default: true)
//! STRATA_MEMTABLE_CAPACITY    records per memtable         (default: 1000)
//! STRATA_MEMTABLE_KIND        btree | skiplist | hashmap   (default: skiplist)
//! STRATA_MEMTABLE_INSTANCES   memtables kept in memory     (default: 2)
//! STRATA_BTREE_ORDER          B-tree order                 (default: 16)
//! STRATA_SKIPLIST_MAX_HEIGHT  skip list tower cap          (default: 12)
//! STRATA_CACHE_CAPACITY       read cache entries           (default: 1024, 0 = off)
//! STRATA_INDEX_DEGREE         records per index entry      (default: 16)
//! STRATA_SUMMARY_DEGREE       index entries per summary    (default: 16)
//! STRATA_SINGLE_FILE          one file per SSTable         (default: false)
//! STRATA_COMPRESSION          dictionary-encode keys       (default: false)
//! STRATA_BLOOM_FPR            bloom false-positive rate    (default: 0.01)
//! STRATA_LSM_MAX_DEPTH        number of levels             (default: 4)
//! STRATA_LSM_GROWTH_FACTOR    level capacity base          (default: 4)
//! STRATA_COMPACTION           size-tiered | leveled        (default: size-tiered)
//! STRATA_LEVELED_TABLE_RECORDS records per leveled table   (default: 4096)
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Which structure backs each memtable. Chosen once at engine open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemtableKind {
    BTree,
    SkipList,
    HashMap,
}

/// How an overflowing level is merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionKind {
    /// Every table of the level merges into one table that replaces the level.
    SizeTiered,
    /// The level merges into the next one as key-disjoint tables.
    Leveled,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{name} must be {requirement}")]
    OutOfRange {
        name: &'static str,
        requirement: &'static str,
    },
}

impl FromStr for MemtableKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "btree" | "tree" | "b-tree" => Ok(MemtableKind::BTree),
            "skiplist" | "skip-list" => Ok(MemtableKind::SkipList),
            "hashmap" | "hash" => Ok(MemtableKind::HashMap),
            _ => Err(ConfigError::InvalidValue {
                name: "memtable kind",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for MemtableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemtableKind::BTree => "btree",
            MemtableKind::SkipList => "skiplist",
            MemtableKind::HashMap => "hashmap",
        })
    }
}

impl FromStr for CompactionKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "size-tiered" | "size_tiered" | "sizetiered" | "tiered" => {
                Ok(CompactionKind::SizeTiered)
            }
            "leveled" | "levelled" => Ok(CompactionKind::Leveled),
            _ => Err(ConfigError::InvalidValue {
                name: "compaction kind",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for CompactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompactionKind::SizeTiered => "size-tiered",
            CompactionKind::Leveled => "leveled",
        })
    }
}

/// Every tunable of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Root directory. WAL segments live in `<data_dir>/wal`, SSTables in
    /// `<data_dir>/sstables`.
    pub data_dir: PathBuf,
    /// Byte budget of one WAL segment file.
    pub wal_segment_bytes: u64,
    /// If `true`, every WAL append is followed by `fsync`.
    pub wal_sync: bool,
    /// Records a memtable holds before it is rotated out.
    pub memtable_capacity: usize,
    pub memtable_kind: MemtableKind,
    /// Memtables kept in memory (one active, the rest waiting to flush).
    pub memtable_instances: usize,
    pub btree_order: usize,
    pub skiplist_max_height: usize,
    /// Entries in the read cache. `0` disables the cache.
    pub cache_capacity: usize,
    /// Every Nth record of a data block gets an index entry.
    pub index_degree: usize,
    /// Every Mth index entry gets a summary entry.
    pub summary_degree: usize,
    pub single_file_layout: bool,
    /// Dictionary-encode keys inside SSTables.
    pub compression: bool,
    pub bloom_fpr: f64,
    pub lsm_max_depth: usize,
    /// Size-tiered: tables per level before compaction.
    /// Leveled: level `i` holds `growth_factor^(i+1)` tables.
    pub lsm_growth_factor: usize,
    pub compaction_kind: CompactionKind,
    /// Upper bound on records per table written by leveled compaction.
    pub leveled_table_records: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            wal_segment_bytes: 1024 * 1024,
            wal_sync: true,
            memtable_capacity: 1000,
            memtable_kind: MemtableKind::SkipList,
            memtable_instances: 2,
            btree_order: 16,
            skiplist_max_height: 12,
            cache_capacity: 1024,
            index_degree: 16,
            summary_degree: 16,
            single_file_layout: false,
            compression: false,
            bloom_fpr: 0.01,
            lsm_max_depth: 4,
            lsm_growth_factor: 4,
            compaction_kind: CompactionKind::SizeTiered,
            leveled_table_records: 4096,
        }
    }
}

impl EngineConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Directory holding WAL segments.
    #[must_use]
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    /// Directory holding one subdirectory per SSTable.
    #[must_use]
    pub fn sstable_dir(&self) -> PathBuf {
        self.data_dir.join("sstables")
    }

    pub fn with_wal_segment_bytes(mut self, bytes: u64) -> Self {
        self.wal_segment_bytes = bytes;
        self
    }

    pub fn with_wal_sync(mut self, sync: bool) -> Self {
        self.wal_sync = sync;
        self
    }

    pub fn with_memtable_capacity(mut self, capacity: usize) -> Self {
        self.memtable_capacity = capacity;
        self
    }

    pub fn with_memtable_kind(mut self, kind: MemtableKind) -> Self {
        self.memtable_kind = kind;
        self
    }

    pub fn with_memtable_instances(mut self, instances: usize) -> Self {
        self.memtable_instances = instances;
        self
    }

    pub fn with_btree_order(mut self, order: usize) -> Self {
        self.btree_order = order;
        self
    }

    pub fn with_skiplist_max_height(mut self, height: usize) -> Self {
        self.skiplist_max_height = height;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_index_degree(mut self, degree: usize) -> Self {
        self.index_degree = degree;
        self
    }

    pub fn with_summary_degree(mut self, degree: usize) -> Self {
        self.summary_degree = degree;
        self
    }

    pub fn with_single_file_layout(mut self, single_file: bool) -> Self {
        self.single_file_layout = single_file;
        self
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_lsm_max_depth(mut self, depth: usize) -> Self {
        self.lsm_max_depth = depth;
        self
    }

    pub fn with_lsm_growth_factor(mut self, factor: usize) -> Self {
        self.lsm_growth_factor = factor;
        self
    }

    pub fn with_compaction_kind(mut self, kind: CompactionKind) -> Self {
        self.compaction_kind = kind;
        self
    }

    pub fn with_leveled_table_records(mut self, records: usize) -> Self {
        self.leveled_table_records = records;
        self
    }

    /// Checks every bound the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn require(ok: bool, name: &'static str, requirement: &'static str) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::OutOfRange { name, requirement })
            }
        }

        require(self.wal_segment_bytes > 0, "wal_segment_bytes", "> 0")?;
        require(self.memtable_capacity > 0, "memtable_capacity", "> 0")?;
        require(self.memtable_instances > 0, "memtable_instances", "> 0")?;
        require(self.btree_order >= 3, "btree_order", ">= 3")?;
        require(
            (1..=32).contains(&self.skiplist_max_height),
            "skiplist_max_height",
            "between 1 and 32",
        )?;
        require(self.index_degree > 0, "index_degree", "> 0")?;
        require(self.summary_degree > 0, "summary_degree", "> 0")?;
        require(
            self.bloom_fpr > 0.0 && self.bloom_fpr < 1.0,
            "bloom_fpr",
            "in (0, 1)",
        )?;
        require(self.lsm_max_depth > 0, "lsm_max_depth", "> 0")?;
        require(self.lsm_growth_factor >= 2, "lsm_growth_factor", ">= 2")?;
        require(self.leveled_table_records > 0, "leveled_table_records", "> 0")?;
        Ok(())
    }

    /// Reads the configuration from `STRATA_*` environment variables, falling
    /// back to the defaults for unset variables, then validates it.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let cfg = Self {
            data_dir: lookup("STRATA_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            wal_segment_bytes: parse_or(&lookup, "STRATA_WAL_SEGMENT_BYTES", d.wal_segment_bytes)?,
            wal_sync: parse_or(&lookup, "STRATA_WAL_SYNC", d.wal_sync)?,
            memtable_capacity: parse_or(&lookup, "STRATA_MEMTABLE_CAPACITY", d.memtable_capacity)?,
            memtable_kind: parse_or(&lookup, "STRATA_MEMTABLE_KIND", d.memtable_kind)?,
            memtable_instances: parse_or(&lookup, "STRATA_MEMTABLE_INSTANCES", d.memtable_instances)?,
            btree_order: parse_or(&lookup, "STRATA_BTREE_ORDER", d.btree_order)?,
            skiplist_max_height: parse_or(&lookup, "STRATA_SKIPLIST_MAX_HEIGHT", d.skiplist_max_height)?,
            cache_capacity: parse_or(&lookup, "STRATA_CACHE_CAPACITY", d.cache_capacity)?,
            index_degree: parse_or(&lookup, "STRATA_INDEX_DEGREE", d.index_degree)?,
            summary_degree: parse_or(&lookup, "STRATA_SUMMARY_DEGREE", d.summary_degree)?,
            single_file_layout: parse_or(&lookup, "STRATA_SINGLE_FILE", d.single_file_layout)?,
            compression: parse_or(&lookup, "STRATA_COMPRESSION", d.compression)?,
            bloom_fpr: parse_or(&lookup, "STRATA_BLOOM_FPR", d.bloom_fpr)?,
            lsm_max_depth: parse_or(&lookup, "STRATA_LSM_MAX_DEPTH", d.lsm_max_depth)?,
            lsm_growth_factor: parse_or(&lookup, "STRATA_LSM_GROWTH_FACTOR", d.lsm_growth_factor)?,
            compaction_kind: parse_or(&lookup, "STRATA_COMPACTION", d.compaction_kind)?,
            leveled_table_records: parse_or(
                &lookup,
                "STRATA_LEVELED_TABLE_RECORDS",
                d.leveled_table_records,
            )?,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name,
            value: raw,
        }),
    }
}
