//! Write-Ahead Log for durability and recovery.
//!
//! Every mutation is appended here and flushed to the OS before it becomes
//! visible in the memtable. On startup the log is replayed to rebuild the
//! memtable; after a successful flush to an SSTable the log is truncated.
//!
//! # Record Format
//!
//! Each record is variable-length:
//!
//! ```text
//! +--------+-------------+---------+-------------+---------+
//! | op: u8 | key_len:u32 |   key   | val_len:u32 |  value  |
//! +--------+-------------+---------+-------------+---------+
//! | 1 byte |   4 bytes   | var len |   4 bytes   | var len |
//! +--------+-------------+---------+-------------+---------+
//! ```
//!
//! - `op` is 1 for a put, 2 for a delete; deletes carry `val_len = 0`
//! - All multi-byte integers are little-endian
//! - There is no header and no checksum; the byte layout above is the
//!   persistence contract
//!
//! # Recovery
//!
//! Replay reads records from offset zero until EOF or a record that cannot
//! be parsed. A torn record at the tail (the residue of a crash mid-append)
//! is silently dropped; corruption further in terminates replay at that
//! point and every earlier record remains valid.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// The kind of mutation a WAL record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Put = OP_PUT as isize,
    Delete = OP_DELETE as isize,
}

/// A single logged mutation. Deletes carry an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub op: Op,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    fn write<W: Write>(op: Op, key: &[u8], value: &[u8], writer: &mut W) -> Result<()> {
        writer.write_u8(op as u8)?;
        writer.write_u32::<LittleEndian>(key.len() as u32)?;
        writer.write_all(key)?;
        writer.write_u32::<LittleEndian>(value.len() as u32)?;
        writer.write_all(value)?;
        Ok(())
    }

    /// Decodes one record. `Ok(None)` means the log ended cleanly or mid-
    /// record (torn write); replay stops there either way.
    fn read<R: Read>(reader: &mut R) -> Result<Option<Record>> {
        let op = match reader.read_u8() {
            Ok(OP_PUT) => Op::Put,
            Ok(OP_DELETE) => Op::Delete,
            Ok(tag) => return Err(Error::Corruption(format!("invalid wal op tag: {tag}"))),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let Some(key) = read_field(reader)? else {
            return Ok(None);
        };
        let Some(value) = read_field(reader)? else {
            return Ok(None);
        };

        Ok(Some(Record { op, key, value }))
    }
}

/// Reads a length-prefixed field, mapping a truncated read to `None`.
fn read_field<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let len = match reader.read_u32::<LittleEndian>() {
        Ok(len) => len as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut buf = vec![0u8; len];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(Some(buf)),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// The write-ahead log file. All operations are serialized by the internal
/// mutex; appends land in the OS page cache before returning, and `sync`
/// escalates to fsync.
pub struct Wal {
    file: File,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal").field("path", &self.path).finish()
    }
}

impl Wal {
    /// Opens the log at `path`, creating it if absent. The file is opened
    /// in append mode, so writes continue after any surviving records.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::options()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let writer = BufWriter::new(file.try_clone()?);

        Ok(Self {
            file,
            writer: Mutex::new(writer),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current log size in bytes.
    pub fn size(&self) -> u64 {
        self.file.metadata().map_or(0, |meta| meta.len())
    }

    /// Appends one mutation and flushes it through to the OS. Returns only
    /// after the record is at least in the page cache.
    pub fn append(&self, op: Op, key: &[u8], value: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().unwrap();
        Record::write(op, key, value, &mut *writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Replays the log from the beginning. The iterator reads through an
    /// independent handle, so the append position is unaffected.
    pub fn replay(&self) -> Result<ReplayIterator> {
        ReplayIterator::open(&self.path)
    }

    /// Truncates the log to zero length. Called after the memtable it
    /// covers has been durably flushed to an SSTable.
    pub fn checkpoint(&self) -> Result<()> {
        let mut writer = self.writer.lock().unwrap();
        writer.flush()?;
        self.file.set_len(0)?;
        Ok(())
    }

    /// Forces buffered records down to storage (fsync).
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock().unwrap();
        writer.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Iterator over the parseable prefix of a WAL file. Stops at EOF, at a
/// torn tail, or at the first corrupt record.
pub struct ReplayIterator {
    reader: BufReader<File>,
}

impl ReplayIterator {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }
}

impl Iterator for ReplayIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match Record::read(&mut self.reader) {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(Error::Corruption(msg)) => {
                tracing::warn!(error = %msg, "wal replay stopped at corrupt record");
                None
            }
            Err(e) => Some(Err(e)),
        }
    }
}
