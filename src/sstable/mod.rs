//! Immutable sorted on-disk tables.
//!
//! An SSTable is the durable form of a flushed memtable: its entries are
//! laid out in ascending key order, followed by a sparse index and a footer
//! that locates the index.
//!
//! ```text
//! +--------------------+
//! | Entry 0            |   u8 deleted | u32 key_len | key
//! | Entry 1            |             | u32 val_len | value
//! | ...                |
//! | Entry N-1          |
//! +--------------------+
//! | index_size: u32    |
//! | Index entries      |   u32 key_len | key | u64 offset
//! +--------------------+
//! | index_offset: u64  |   absolute offset of index_size
//! | entry_count: u64   |
//! +--------------------+
//! ```
//!
//! All integers are little-endian. Every 16th data entry is indexed, so a
//! point lookup binary-searches the in-memory index and then probes at most
//! 17 consecutive entries on disk. Files are written once and never
//! modified.

pub mod index;
pub mod table;

pub use index::{SparseIndex, INDEX_INTERVAL};
pub use table::{SSTable, TableEntry, Writer};

/// Builds the on-disk file name for a table id.
pub fn file_name(id: u64) -> String {
    format!("sstable_{id}.sst")
}

/// Parses a table id back out of a file name. Returns `None` for anything
/// that is not exactly `sstable_<digits>.sst`.
pub fn parse_file_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix("sstable_")?.strip_suffix(".sst")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
