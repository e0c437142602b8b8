/// Write path: `put()`, `delete()`, `flush()`, `close()` and memtable
/// rotation.
///
/// Every mutation first makes room in the memtable pool (rotating a full
/// active memtable and flushing the oldest ones to level 0), then appends to
/// the WAL, then applies to the active memtable. A failed append leaves the
/// memtables untouched.
use anyhow::{ensure, Context, Result};
use record::Record;
use sstable::{SSTableReader, SSTableWriter};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::manifest::table_name;
use crate::{Engine, MAX_KEY_SIZE, MAX_VALUE_SIZE};

pub(crate) fn validate_key(key: &str) -> Result<()> {
    ensure!(!key.is_empty(), "key must not be empty");
    ensure!(
        key.len() <= MAX_KEY_SIZE,
        "key too large: {} bytes (max {})",
        key.len(),
        MAX_KEY_SIZE
    );
    Ok(())
}

impl Engine {
    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty or oversized key or value, or if the
    /// WAL append or a triggered flush fails. On error the key keeps its
    /// previous value.
    pub fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;
        ensure!(
            value.len() <= MAX_VALUE_SIZE,
            "value too large: {} bytes (max {})",
            value.len(),
            MAX_VALUE_SIZE
        );
        self.write(|ts| Record::live(key, value.to_vec(), ts))
    }

    /// Deletes `key` by writing a tombstone that shadows every older value.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.write(|ts| Record::tombstone(key, ts))
    }

    fn write<F>(&mut self, build: F) -> Result<()>
    where
        F: FnOnce(u64) -> Record,
    {
        self.make_room()?;

        let ts = self.next_timestamp()?;
        let record = build(ts);
        self.wal
            .append(&record)
            .context("failed to append to the write-ahead log")?;
        self.last_timestamp = ts;

        self.cache.remove(&record.key);
        self.pool.insert(record);
        Ok(())
    }

    /// Next timestamp: wall-clock nanoseconds, bumped past the last one so
    /// timestamps stay strictly increasing even if the clock steps back.
    fn next_timestamp(&self) -> Result<u64> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        let now = u64::try_from(now).unwrap_or(u64::MAX);
        let next = self
            .last_timestamp
            .checked_add(1)
            .context("timestamp overflow (u64::MAX reached)")?;
        Ok(now.max(next))
    }

    /// Rotates a full active memtable and flushes until the pool is back
    /// within `memtable_instances`.
    fn make_room(&mut self) -> Result<()> {
        if self.pool.needs_rotation() {
            self.rotate()?;
        }
        while self.pool.needs_flush() {
            self.flush_oldest()?;
        }
        Ok(())
    }

    /// Seals the WAL so the next memtable's records start in a fresh segment,
    /// then rotates the pool.
    fn rotate(&mut self) -> Result<()> {
        let segment = self.wal.seal()?;
        self.pool.rotate(segment);
        debug!(segment, memtables = self.pool.instances(), "memtable rotated");
        Ok(())
    }

    /// Writes every memtable to level 0, oldest first. A no-op when all
    /// memtables are empty.
    pub fn flush(&mut self) -> Result<()> {
        if !self.pool.active().memtable.is_empty() {
            self.rotate()?;
        }
        while self.pool.oldest_flushing().is_some() {
            self.flush_oldest()?;
        }
        Ok(())
    }

    /// Flushes every memtable and syncs the WAL. The engine is consumed; the
    /// drop that follows has nothing left to do.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.wal.sync_to_disk()?;
        info!(data_dir = %self.config.data_dir.display(), "engine closed");
        Ok(())
    }

    /// Allocates the directory name of a new table.
    pub(crate) fn next_table_name(&mut self) -> String {
        self.generation += 1;
        table_name(self.generation)
    }

    /// Writes the oldest flushing memtable to a new level-0 table, drops it
    /// from the pool, retires the WAL segments it covered and cascades
    /// compaction.
    pub(crate) fn flush_oldest(&mut self) -> Result<()> {
        let name = self.next_table_name();
        let Some(oldest) = self.pool.oldest_flushing() else {
            return Ok(());
        };
        let dir = self.sst_dir.join(&name);
        let meta = SSTableWriter::write_memtable(&dir, &oldest.memtable, &self.table_options)
            .with_context(|| format!("failed to flush memtable to {}", dir.display()))?;
        let reader = SSTableReader::open(&dir)?;

        self.manifest.add(name.clone(), 0);
        if let Err(e) = self.manifest.save() {
            self.manifest.entries.retain(|entry| entry.name != name);
            return Err(e);
        }
        self.levels[0].insert(0, reader);
        self.pool.pop_oldest_flushing();
        info!(
            table = %name,
            records = meta.record_count,
            min_key = %meta.min_key,
            max_key = %meta.max_key,
            "memtable flushed"
        );

        self.retire_wal()?;
        self.check_level(0)
    }

    /// Removes WAL segments whose records are all in SSTables.
    pub(crate) fn retire_wal(&mut self) -> Result<()> {
        let keep = self.pool.oldest_wal_segment();
        self.wal.remove_segments_before(keep)?;
        Ok(())
    }
}
