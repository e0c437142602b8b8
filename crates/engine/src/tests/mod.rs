use crate::*;
use anyhow::Result;
use config::EngineConfig;
use std::path::Path;

mod cache_tests;
mod write_tests;

/// Small memtables, one instance and no fsync so tests flush and compact
/// after a handful of writes.
pub(super) fn small_config(dir: &Path) -> EngineConfig {
    EngineConfig::new(dir)
        .with_wal_sync(false)
        .with_memtable_capacity(4)
        .with_memtable_instances(1)
        .with_cache_capacity(16)
        .with_index_degree(2)
        .with_summary_degree(2)
}

pub(super) fn key(i: usize) -> String {
    format!("key{:03}", i)
}

/// Puts `key(i) -> "v{i}"` for every `i` in `range`.
pub(super) fn put_numbered(engine: &mut Engine, range: std::ops::Range<usize>) -> Result<()> {
    for i in range {
        engine.put(&key(i), format!("v{}", i).as_bytes())?;
    }
    Ok(())
}

pub(super) fn keys_of(records: &[Record]) -> Vec<&str> {
    records.iter().map(|r| r.key.as_str()).collect()
}

/// Leaves the engine without the flush that `Drop` performs, as a crash
/// would.
pub(super) fn crash(engine: Engine) {
    std::mem::forget(engine);
}
