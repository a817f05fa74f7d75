//! Writing and reading SSTable files.
//!
//! A [`Writer`] streams a memtable snapshot out in ascending key order and
//! seals it with the sparse index and footer. An [`SSTable`] loads the
//! footer and index once at open and then serves point lookups; it never
//! holds a file handle between lookups.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::memtable::Memtable;

use super::index::{SparseIndex, INDEX_INTERVAL};

/// `index_offset: u64` followed by `entry_count: u64`.
const FOOTER_LEN: u64 = 16;

/// An entry read back from the data region. Tombstones carry an empty
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub deleted: bool,
}

impl TableEntry {
    /// Size of this entry as laid out on disk.
    fn encoded_len(&self) -> u64 {
        (1 + 4 + 4 + self.key.len() + self.value.len()) as u64
    }
}

fn read_entry<R: Read>(reader: &mut R) -> Result<TableEntry> {
    let deleted = reader
        .read_u8()
        .map_err(|e| Error::Corruption(format!("unreadable entry flag: {e}")))?
        != 0;

    let key_len = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| Error::Corruption(format!("unreadable entry key length: {e}")))?;
    let mut key = vec![0u8; key_len as usize];
    reader
        .read_exact(&mut key)
        .map_err(|e| Error::Corruption(format!("unreadable entry key: {e}")))?;

    let value_len = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| Error::Corruption(format!("unreadable entry value length: {e}")))?;
    let mut value = vec![0u8; value_len as usize];
    reader
        .read_exact(&mut value)
        .map_err(|e| Error::Corruption(format!("unreadable entry value: {e}")))?;

    Ok(TableEntry {
        key,
        value,
        deleted,
    })
}

/// Streams data entries to a new SSTable file and seals it with the index
/// and footer. Entries must be added in strictly ascending key order; the
/// memtable's iteration order satisfies this.
pub struct Writer {
    file: BufWriter<File>,
    index: SparseIndex,
    offset: u64,
    count: u64,
}

impl Writer {
    /// Creates the table file at `path`, truncating anything already there.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            file: BufWriter::new(file),
            index: SparseIndex::new(),
            offset: 0,
            count: 0,
        })
    }

    /// Appends one data entry, indexing it if its ordinal is a multiple of
    /// the index interval.
    pub fn add(&mut self, key: &[u8], value: &[u8], deleted: bool) -> Result<()> {
        if self.count % INDEX_INTERVAL as u64 == 0 {
            self.index.push(key.to_vec(), self.offset);
        }

        self.file.write_u8(deleted as u8)?;
        self.file.write_u32::<LittleEndian>(key.len() as u32)?;
        self.file.write_all(key)?;
        self.file.write_u32::<LittleEndian>(value.len() as u32)?;
        self.file.write_all(value)?;

        self.offset += (1 + 4 + 4 + key.len() + value.len()) as u64;
        self.count += 1;
        Ok(())
    }

    /// Writes the sparse index and footer and flushes the file. The table
    /// is visible to readers once this returns.
    pub fn finish(mut self) -> Result<()> {
        let index_offset = self.offset;

        self.index.write_to(&mut self.file)?;
        self.file.write_u64::<LittleEndian>(index_offset)?;
        self.file.write_u64::<LittleEndian>(self.count)?;
        self.file.flush()?;
        Ok(())
    }
}

/// Persists a memtable snapshot as `sstable_<id>.sst` under `dir` and
/// returns the path.
pub fn write_memtable(dir: &Path, id: u64, memtable: &Memtable) -> Result<PathBuf> {
    let path = dir.join(super::file_name(id));
    let mut writer = Writer::create(&path)?;

    for (key, entry) in memtable.iter() {
        writer.add(key, &entry.value, entry.deleted)?;
    }

    writer.finish()?;
    Ok(path)
}

/// A reader over one immutable SSTable file.
///
/// Construction loads the footer, the sparse index, and the min/max keys;
/// after that the reader is value-like and immutable. Each lookup opens the
/// file independently, so readers can be probed from any number of threads.
#[derive(Debug)]
pub struct SSTable {
    id: u64,
    path: PathBuf,
    index: SparseIndex,
    index_offset: u64,
    entry_count: u64,
    min_key: Vec<u8>,
    max_key: Vec<u8>,
}

impl SSTable {
    /// Opens the table at `path` and loads its index into memory.
    pub fn open(id: u64, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();

        if file_len < FOOTER_LEN {
            return Err(Error::InvalidState(format!(
                "sstable {} too short for footer: {file_len} bytes",
                path.display()
            )));
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::End(-(FOOTER_LEN as i64)))?;
        let index_offset = reader.read_u64::<LittleEndian>()?;
        let entry_count = reader.read_u64::<LittleEndian>()?;

        if index_offset > file_len - FOOTER_LEN {
            return Err(Error::InvalidState(format!(
                "sstable {} index offset {index_offset} beyond file end",
                path.display()
            )));
        }

        reader.seek(SeekFrom::Start(index_offset))?;
        let index = SparseIndex::read_from(&mut reader)?;

        // The smallest key is the first data entry; the largest is found by
        // scanning the final sparse interval, which holds at most
        // INDEX_INTERVAL entries.
        let mut min_key = Vec::new();
        let mut max_key = Vec::new();
        if let Some(last) = index.last() {
            reader.seek(SeekFrom::Start(0))?;
            min_key = read_entry(&mut reader)?.key;

            let mut pos = last.offset;
            reader.seek(SeekFrom::Start(pos))?;
            while pos < index_offset {
                let entry = read_entry(&mut reader)?;
                pos += entry.encoded_len();
                max_key = entry.key;
            }
        }

        Ok(Self {
            id,
            path,
            index,
            index_offset,
            entry_count,
            min_key,
            max_key,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of data entries in the file, tombstones included.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn min_key(&self) -> &[u8] {
        &self.min_key
    }

    pub fn max_key(&self) -> &[u8] {
        &self.max_key
    }

    /// Range check only: true iff the table is non-empty and `key` falls
    /// within `[min_key, max_key]`. False positives are possible, false
    /// negatives are not.
    pub fn might_contain(&self, key: &[u8]) -> bool {
        !self.index.is_empty()
            && self.min_key.as_slice() <= key
            && key <= self.max_key.as_slice()
    }

    /// Point lookup. Returns the stored entry, tombstones included; the
    /// engine decides what a tombstone means.
    pub fn get(&self, key: &[u8]) -> Result<Option<TableEntry>> {
        if !self.might_contain(key) {
            return Ok(None);
        }

        let start = self.index.seek(key).map_or(0, |entry| entry.offset);

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut reader = BufReader::new(file);

        // A sparse interval holds at most INDEX_INTERVAL entries, so the
        // probe either matches or overshoots within this window.
        let mut pos = start;
        for _ in 0..=INDEX_INTERVAL {
            if pos >= self.index_offset {
                break;
            }
            let entry = read_entry(&mut reader)?;
            pos += entry.encoded_len();

            match entry.key.as_slice().cmp(key) {
                Ordering::Less => continue,
                Ordering::Equal => return Ok(Some(entry)),
                Ordering::Greater => break,
            }
        }

        Ok(None)
    }
}
