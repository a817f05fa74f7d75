//! EmberDB: a durable embedded key-value store built as a Log-Structured
//! Merge tree.
//!
//! Keys and values are opaque byte strings. Writes are buffered in an
//! in-memory [`memtable::Memtable`] and made durable through a write-ahead
//! log; when the memtable grows past a configured threshold it is flushed
//! to an immutable, sorted, sparsely-indexed [`sstable::SSTable`] file.
//!
//! # Data Flow
//!
//! ## Write Path
//! 1. **WAL append**: the mutation is written to `wal.log` and flushed to
//!    the OS before it becomes visible.
//! 2. **Memtable update**: the key is inserted or overwritten in place;
//!    deletes write a tombstone.
//! 3. **Flush**: once the memtable's payload bytes reach the size limit it
//!    is written out as `sstable_<id>.sst`, prepended to the table stack,
//!    and the WAL is truncated.
//!
//! ## Read Path
//! 1. **Memtable**: the newest state; a tombstone here means absent.
//! 2. **SSTables**: probed newest to oldest, short-circuiting on the first
//!    table that contains the key (tombstone included).
//!
//! ## Recovery
//! On open, existing SSTables are loaded newest-first from the data
//! directory and the surviving WAL records are replayed into a fresh
//! memtable. A torn record at the tail of the log is discarded.
//!
//! There is no compaction: SSTables are created, never merged or removed.

pub mod config;
pub mod engine;
pub mod error;
pub mod flock;
pub mod memtable;
pub mod sstable;
pub mod wal;

pub use config::Config;
pub use engine::LsmEngine;
pub use error::{Error, Result};
