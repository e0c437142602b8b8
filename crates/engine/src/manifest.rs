/// # Manifest - SSTable Level Metadata
///
/// Tracks which SSTable directories belong to which LSM level so that the
/// engine can rebuild its levels after a restart.
///
/// ## File Format
///
/// A text file with one table per line, newest first within a level:
///
/// ```text
/// # StrataKV SSTable Manifest
/// # Format: L<level>:<table>
/// L0:sstable_0000000007
/// L0:sstable_0000000006
/// L1:sstable_0000000003
/// ```
///
/// Lines starting with `#` are comments. Empty lines are ignored.
///
/// ## Crash Safety
///
/// The manifest is rewritten atomically: write to `MANIFEST.tmp`, fsync, then
/// rename over the existing manifest.
use anyhow::{anyhow, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Name of the manifest file within the SSTable directory.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// Prefix of every SSTable directory name, followed by a 10-digit generation.
pub const TABLE_PREFIX: &str = "sstable_";

/// Directory name of the table with generation `generation`.
pub fn table_name(generation: u64) -> String {
    format!("{}{:010}", TABLE_PREFIX, generation)
}

/// Generation encoded in a table directory name.
pub fn parse_table_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(TABLE_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Level assignment of a single table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    /// Directory name, not the full path.
    pub name: String,
    pub level: usize,
}

/// In-memory representation of the manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    /// Sorted by level; newest first within a level.
    pub entries: Vec<TableEntry>,
}

impl Manifest {
    /// Loads `sst_dir/MANIFEST`, or returns an empty manifest if the file does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest exists but cannot be parsed.
    pub fn load_or_create(sst_dir: &Path) -> Result<Self> {
        let path = sst_dir.join(MANIFEST_FILENAME);
        if !path.exists() {
            return Ok(Self {
                path,
                entries: Vec::new(),
            });
        }

        let file = File::open(&path)
            .with_context(|| format!("failed to open manifest at {}", path.display()))?;
        let mut entries = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("failed to read manifest line {}", line_num + 1))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            entries.push(parse_line(trimmed).with_context(|| format!("manifest line {}", line_num + 1))?);
        }
        // Stable sort keeps the newest-first order inside each level
        entries.sort_by_key(|e: &TableEntry| e.level);
        Ok(Self { path, entries })
    }

    /// Persists the manifest atomically.
    pub fn save(&self) -> Result<()> {
        let tmp_path = self.path.with_file_name(MANIFEST_TMP_FILENAME);
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .with_context(|| format!("failed to create manifest tmp at {}", tmp_path.display()))?;
            writeln!(f, "# StrataKV SSTable Manifest")?;
            writeln!(f, "# Format: L<level>:<table>")?;
            for entry in &self.entries {
                writeln!(f, "L{}:{}", entry.level, entry.name)?;
            }
            f.flush()?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to install manifest at {}", self.path.display()))?;
        Ok(())
    }

    /// Table names at `level`, newest first.
    #[cfg(test)]
    pub fn tables_at(&self, level: usize) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Highest level that has an entry, if any.
    pub fn deepest_level(&self) -> Option<usize> {
        self.entries.iter().map(|e| e.level).max()
    }

    /// Adds a table at the front of `level` (does **not** save).
    pub fn add(&mut self, name: String, level: usize) {
        let pos = self
            .entries
            .iter()
            .position(|e| e.level >= level)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, TableEntry { name, level });
    }

    /// Replaces the contents of `level` with `names`, in the given order.
    pub fn set_level(&mut self, level: usize, names: Vec<String>) {
        self.entries.retain(|e| e.level != level);
        let pos = self
            .entries
            .iter()
            .position(|e| e.level > level)
            .unwrap_or(self.entries.len());
        let new = names.into_iter().map(|name| TableEntry { name, level });
        self.entries.splice(pos..pos, new);
    }

    /// Highest generation referenced by any entry.
    pub fn max_generation(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|e| parse_table_name(&e.name))
            .max()
            .unwrap_or(0)
    }
}

fn parse_line(line: &str) -> Result<TableEntry> {
    let (level, name) = line
        .split_once(':')
        .ok_or_else(|| anyhow!("invalid format (expected 'L<n>:<table>'): {}", line))?;
    let level = level
        .strip_prefix('L')
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| anyhow!("unknown level '{}'", level))?;
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return Err(anyhow!("invalid table name '{}'", name));
    }
    Ok(TableEntry {
        name: name.to_string(),
        level,
    })
}
