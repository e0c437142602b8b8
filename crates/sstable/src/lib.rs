//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk storage for the StrataKV engine.
//!
//! When a memtable is flushed, or when compaction merges older tables, the
//! records are written out as an SSTable. Tables are *write-once,
//! read-many*: once installed they are never modified, only replaced by
//! compaction.
//!
//! ## Sections
//!
//! Every table is a directory holding five logical sections:
//!
//! ```text
//! data     records in ascending key order (record::codec encoding)
//! index    key_len u64 | key | data_offset u64, one entry per N records
//! summary  min key | max key | max_ts u64 | count u64 | one entry per M
//!          index entries (key_len u64 | key | index_offset u64)
//! filter   bloom filter over every key
//! merkle   hash tree with one leaf per encoded data record
//! ```
//!
//! With the **separate** layout each section is its own file (`data.db`,
//! `index.db`, ...). With the **single-file** layout they are concatenated
//! into `table.db` behind a header:
//!
//! ```text
//! header_len u64 | min key | max key | data, index, summary, filter and
//! merkle offsets (u64 each, absolute)
//! ```
//!
//! When key compression is enabled every key is replaced by its decimal code
//! in a per-table `dictionary.db` (`count u64 | key_len u64 | key ...`). The
//! reader maps codes back before comparing, so order is always the order of
//! the original keys.
//!
//! All integers are big-endian.

mod dictionary;
mod format;
mod iter;
mod merge;
mod reader;
mod writer;

pub use format::{Layout, TableOptions};
pub use iter::{PrefixIterator, RangeIterator, SSTableIterator};
pub use merge::{collect_all, merge_tables, IteratorGroup, MergeStream};
pub use reader::SSTableReader;
pub use writer::{tmp_dir, SSTableWriter, TableMeta};

#[cfg(test)]
mod tests;
