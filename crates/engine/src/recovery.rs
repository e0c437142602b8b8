/// Cold-start path: opening tables from the manifest, replaying the WAL into
/// the memtable pool, and cleaning up after interrupted flushes and
/// compactions.
use anyhow::{Context, Result};
use config::EngineConfig;
use memtable::{MemtableParams, MemtablePool};
use sstable::{SSTableReader, TableOptions};
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use wal::{Wal, WalOptions};

use crate::manifest::{parse_table_name, Manifest, MANIFEST_FILENAME};
use crate::{Engine, EngineError, ReadCache};

pub(crate) fn table_options(config: &EngineConfig) -> TableOptions {
    TableOptions {
        single_file: config.single_file_layout,
        compression: config.compression,
        index_degree: config.index_degree,
        summary_degree: config.summary_degree,
        bloom_fpr: config.bloom_fpr,
    }
}

/// Removes staging directories (`*.tmp`) left by interrupted table writes and
/// a half-written manifest.
fn remove_staging(sst_dir: &Path) -> Result<()> {
    for entry in fs::read_dir(sst_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".tmp") {
            continue;
        }
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Ok(()) => info!(path = %path.display(), "removed staging leftover"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove staging leftover"),
        }
    }
    Ok(())
}

/// Table directories present on disk, ascending by generation.
fn tables_on_disk(sst_dir: &Path) -> Result<Vec<(u64, String)>> {
    let mut tables = Vec::new();
    for entry in fs::read_dir(sst_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(generation) = parse_table_name(&name) {
            tables.push((generation, name));
        }
    }
    tables.sort();
    Ok(tables)
}

impl Engine {
    /// Opens (or creates) the database described by `config`.
    ///
    /// # Recovery Steps
    ///
    /// 1. Validate the configuration and create the data directories.
    /// 2. Remove staging leftovers from interrupted writes.
    /// 3. Load the manifest. Without one, every table on disk is adopted into
    ///    level 0; with one, tables it does not list are removed.
    /// 4. Open every table.
    /// 5. Replay the WAL into the memtable pool, cutting a torn tail.
    /// 6. Restore the timestamp high-water mark.
    ///
    /// # Errors
    ///
    /// Any failure is reported with [`EngineError::Unavailable`] as context.
    pub fn open(config: EngineConfig) -> Result<Self> {
        Self::recover(config).context(EngineError::Unavailable)
    }

    fn recover(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let sst_dir = config.sstable_dir();
        let wal_dir = config.wal_dir();
        fs::create_dir_all(&sst_dir)
            .with_context(|| format!("failed to create {}", sst_dir.display()))?;
        remove_staging(&sst_dir)?;

        let mut manifest = Manifest::load_or_create(&sst_dir)?;
        let on_disk = tables_on_disk(&sst_dir)?;
        if manifest.entries.is_empty() && !on_disk.is_empty() {
            warn!(tables = on_disk.len(), "no {} found, adopting tables into level 0", MANIFEST_FILENAME);
            for (_, name) in &on_disk {
                manifest.add(name.clone(), 0);
            }
            manifest.save()?;
        } else {
            for (_, name) in &on_disk {
                if !manifest.entries.iter().any(|e| &e.name == name) {
                    warn!(table = %name, "removing table missing from manifest");
                    fs::remove_dir_all(sst_dir.join(name))?;
                }
            }
        }

        // Levels beyond the configured depth fold into the last level; they
        // are older than everything above them.
        let depth = config.lsm_max_depth;
        let mut levels: Vec<Vec<SSTableReader>> = (0..depth).map(|_| Vec::new()).collect();
        let mut last_timestamp = 0u64;
        for entry in &manifest.entries {
            let dir = sst_dir.join(&entry.name);
            let reader = SSTableReader::open(&dir)
                .with_context(|| format!("failed to open table {}", dir.display()))?;
            last_timestamp = last_timestamp.max(reader.max_timestamp());
            levels[entry.level.min(depth - 1)].push(reader);
        }
        if manifest.deepest_level().map_or(false, |d| d >= depth) {
            for (level, tables) in levels.iter().enumerate() {
                let names = tables
                    .iter()
                    .filter_map(|t| t.dir().file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .collect();
                manifest.set_level(level, names);
            }
            manifest.entries.retain(|e| e.level < depth);
            manifest.save()?;
        }
        let generation = manifest
            .max_generation()
            .max(on_disk.last().map_or(0, |(g, _)| *g));

        // Replay into memtables bound to the first segment: nothing may be
        // retired until all of it is flushed.
        let params = MemtableParams {
            btree_order: config.btree_order,
            skiplist_max_height: config.skiplist_max_height,
        };
        let first_segment = wal::list_segments(&wal_dir)?
            .first()
            .map_or(1, |(seq, _)| *seq);
        let mut pool = MemtablePool::new(
            config.memtable_kind,
            params,
            config.memtable_capacity,
            config.memtable_instances,
            first_segment,
        );
        fs::create_dir_all(&wal_dir)
            .with_context(|| format!("failed to create {}", wal_dir.display()))?;
        let report = wal::replay(&wal_dir, |rec| {
            if pool.needs_rotation() {
                pool.rotate(first_segment);
            }
            last_timestamp = last_timestamp.max(rec.timestamp);
            pool.insert(rec);
        })?;
        if let Some(horizon) = report.horizon {
            wal::truncate_at(&wal_dir, horizon)?;
        }
        let wal = Wal::open(
            &wal_dir,
            WalOptions {
                segment_bytes: config.wal_segment_bytes,
                sync: config.wal_sync,
            },
        )?;

        info!(
            data_dir = %config.data_dir.display(),
            tables = manifest.entries.len(),
            replayed = report.records,
            torn_tail = report.torn_tail,
            last_timestamp,
            "engine recovered"
        );

        let mut engine = Self {
            table_options: table_options(&config),
            cache: ReadCache::new(config.cache_capacity),
            config,
            sst_dir,
            wal,
            pool,
            levels,
            manifest,
            last_timestamp,
            generation,
        };
        // Replay may have produced more memtables than the pool holds
        if engine.pool.needs_flush() {
            engine.flush()?;
        }
        Ok(engine)
    }
}
