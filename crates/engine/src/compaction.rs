/// Compaction: keeps every level within its table budget.
///
/// After a flush adds a table to level 0, [`Engine::check_level`] walks down
/// the levels: a level holding at least its capacity of tables is compacted
/// and the next level is checked in turn. The last level is never checked.
///
/// - **Size-tiered**: every level holds up to `growth_factor` tables. All
///   tables of the level are merged into one table that replaces the level.
/// - **Leveled**: level `i` holds up to `growth_factor^(i+1)` tables. All
///   tables of level `i` plus the tables of level `i+1` whose key range
///   overlaps them are merged and re-partitioned into key-disjoint tables of
///   at most `leveled_table_records` records at level `i+1`.
///
/// The merge streams straight from [`merge_tables`] into [`SSTableWriter`]
/// without materializing the data. Tombstones are dropped only when no level
/// below the output level holds tables; otherwise an older value could
/// resurface.
use anyhow::{ensure, Result};
use config::CompactionKind;
use sstable::{merge_tables, SSTableReader, SSTableWriter};
use tracing::{info, warn};

use crate::Engine;

fn table_names(tables: &[SSTableReader]) -> Vec<String> {
    tables
        .iter()
        .filter_map(|t| t.dir().file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect()
}

impl Engine {
    /// Table budget of `level`.
    #[must_use]
    pub fn level_capacity(&self, level: usize) -> usize {
        let growth = self.config.lsm_growth_factor.max(2);
        match self.config.compaction_kind {
            CompactionKind::SizeTiered => growth,
            CompactionKind::Leveled => {
                let exp = u32::try_from(level + 1).unwrap_or(u32::MAX);
                growth.saturating_pow(exp)
            }
        }
    }

    /// Compacts `level` if it is at capacity, then checks the next level.
    pub(crate) fn check_level(&mut self, level: usize) -> Result<()> {
        let mut level = level;
        while level + 1 < self.levels.len() && self.levels[level].len() >= self.level_capacity(level) {
            self.compact(level)?;
            level += 1;
        }
        Ok(())
    }

    /// Compacts `level` now, regardless of its size, then cascades.
    ///
    /// With leveled compaction the last level is compacted in place.
    pub fn compact_level(&mut self, level: usize) -> Result<()> {
        ensure!(
            level < self.levels.len(),
            "level {} out of range (max depth {})",
            level,
            self.levels.len()
        );
        self.compact(level)?;
        self.check_level(level + 1)
    }

    /// Level receiving the output of compacting `level`.
    fn compaction_target(&self, level: usize) -> usize {
        match self.config.compaction_kind {
            CompactionKind::SizeTiered => level,
            CompactionKind::Leveled => (level + 1).min(self.levels.len() - 1),
        }
    }

    pub(crate) fn compact(&mut self, level: usize) -> Result<()> {
        let target = self.compaction_target(level);
        if self.levels[level].is_empty() || (target == level && self.levels[level].len() < 2) {
            return Ok(());
        }

        // Inputs newest first: the whole source level, then overlapping
        // tables of the target level.
        let (min, max) = self.levels[level]
            .iter()
            .fold((None::<&str>, None::<&str>), |(lo, hi), t| {
                (
                    Some(lo.map_or(t.min_key(), |lo| lo.min(t.min_key()))),
                    Some(hi.map_or(t.max_key(), |hi| hi.max(t.max_key()))),
                )
            });
        let (min, max) = (min.unwrap_or_default().to_string(), max.unwrap_or_default().to_string());
        let overlapping: Vec<usize> = if target == level {
            Vec::new()
        } else {
            self.levels[target]
                .iter()
                .enumerate()
                .filter(|(_, t)| t.overlaps_range(&min, &max))
                .map(|(i, _)| i)
                .collect()
        };

        let drop_tombstones = self.levels[target + 1..].iter().all(Vec::is_empty);
        let chunk = match self.config.compaction_kind {
            CompactionKind::SizeTiered => usize::MAX,
            CompactionKind::Leveled => self.config.leveled_table_records.max(1),
        };

        let outputs = {
            let inputs: Vec<&SSTableReader> = self.levels[level]
                .iter()
                .chain(overlapping.iter().map(|&i| &self.levels[target][i]))
                .collect();
            let expected = inputs.iter().map(|t| t.len()).sum::<u64>();
            let expected = usize::try_from(expected).unwrap_or(usize::MAX).min(chunk);

            let mut stream = merge_tables(&inputs, drop_tombstones)?.peekable();
            let mut outputs: Vec<SSTableReader> = Vec::new();
            while stream.peek().is_some() {
                self.generation += 1;
                let dir = self.sst_dir.join(crate::table_name(self.generation));
                let written = SSTableWriter::create(&dir, stream.by_ref().take(chunk), expected, &self.table_options)
                    .and_then(|_| SSTableReader::open(&dir));
                match written {
                    Ok(reader) => outputs.push(reader),
                    Err(e) => {
                        for out in &outputs {
                            let _ = std::fs::remove_dir_all(out.dir());
                        }
                        let _ = std::fs::remove_dir_all(&dir);
                        return Err(e);
                    }
                }
            }
            outputs
        };

        // Swap the new tables in
        let input_count = self.levels[level].len() + overlapping.len();
        let output_count = outputs.len();
        let mut retired = std::mem::take(&mut self.levels[level]);
        if target == level {
            self.levels[level] = outputs;
        } else {
            let mut kept = Vec::new();
            for (i, table) in std::mem::take(&mut self.levels[target]).into_iter().enumerate() {
                if overlapping.contains(&i) {
                    retired.push(table);
                } else {
                    kept.push(table);
                }
            }
            kept.extend(outputs);
            kept.sort_by(|a, b| a.min_key().cmp(b.min_key()));
            self.levels[target] = kept;
        }

        self.manifest.set_level(level, table_names(&self.levels[level]));
        self.manifest.set_level(target, table_names(&self.levels[target]));
        self.manifest.save()?;

        // Release handles before deleting the directories
        let retired_dirs: Vec<_> = retired.iter().map(|t| t.dir().to_path_buf()).collect();
        drop(retired);
        for dir in &retired_dirs {
            if let Err(e) = std::fs::remove_dir_all(dir) {
                warn!(dir = %dir.display(), error = %e, "failed to remove compacted table");
            }
        }

        info!(
            level,
            target,
            inputs = input_count,
            outputs = output_count,
            drop_tombstones,
            "compaction finished"
        );
        Ok(())
    }
}
