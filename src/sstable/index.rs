//! Sparse index over an SSTable's data region.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Every `INDEX_INTERVAL`-th data entry gets an index entry, starting with
/// entry 0. A lookup therefore probes at most `INDEX_INTERVAL + 1` entries.
pub const INDEX_INTERVAL: usize = 16;

/// One index entry: the key of an indexed data entry and the absolute file
/// offset where that entry starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub offset: u64,
}

/// The sparse index, ordered by key (the data region is sorted, and entries
/// are appended in write order).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseIndex {
    entries: Vec<IndexEntry>,
}

impl SparseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: Vec<u8>, offset: u64) {
        self.entries.push(IndexEntry { key, offset });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&IndexEntry> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&IndexEntry> {
        self.entries.last()
    }

    /// Finds the entry with the greatest indexed key `<= key`, i.e. the
    /// probe start for a point lookup. `None` when `key` sorts before every
    /// indexed key.
    pub fn seek(&self, key: &[u8]) -> Option<&IndexEntry> {
        let idx = self
            .entries
            .partition_point(|entry| entry.key.as_slice() <= key);
        idx.checked_sub(1).map(|idx| &self.entries[idx])
    }

    /// Writes `index_size` followed by the entries.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        for entry in &self.entries {
            writer.write_u32::<LittleEndian>(entry.key.len() as u32)?;
            writer.write_all(&entry.key)?;
            writer.write_u64::<LittleEndian>(entry.offset)?;
        }
        Ok(())
    }

    /// Reads an index written by [`SparseIndex::write_to`].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let count = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::Corruption(format!("unreadable index size: {e}")))?;

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key_len = reader
                .read_u32::<LittleEndian>()
                .map_err(|e| Error::Corruption(format!("unreadable index key length: {e}")))?;
            let mut key = vec![0u8; key_len as usize];
            reader
                .read_exact(&mut key)
                .map_err(|e| Error::Corruption(format!("unreadable index key: {e}")))?;
            let offset = reader
                .read_u64::<LittleEndian>()
                .map_err(|e| Error::Corruption(format!("unreadable index offset: {e}")))?;
            entries.push(IndexEntry { key, offset });
        }

        Ok(Self { entries })
    }
}
