//! The LSM engine: WAL + memtable + SSTable stack.
//!
//! Mutations go to the WAL first, then to the memtable; once the memtable's
//! payload bytes reach the configured limit it is flushed synchronously to
//! a new SSTable and the WAL is truncated. Reads consult the memtable and
//! then each SSTable from newest to oldest, stopping at the first match.
//! A tombstone match means the key is authoritatively absent.
//!
//! All mutable state sits behind a single reader-writer lock: writers
//! (`put`, `delete`, `flush`, `clear`) are exclusive, readers (`get`,
//! `contains`, the counters) run concurrently. The WAL additionally
//! serializes its own operations internally.

use std::fs;
use std::sync::RwLock;

use crate::config::Config;
use crate::error::Result;
use crate::flock::FileLock;
use crate::memtable::Memtable;
use crate::sstable::{self, table, SSTable};
use crate::wal::{Op, Wal};

const WAL_FILE: &str = "wal.log";
const LOCK_FILE: &str = "emberdb.lock";

/// Mutable engine state, guarded by the engine lock.
struct Inner {
    memtable: Memtable,
    /// Newest first: `tables[0]` is the most recently flushed.
    tables: Vec<SSTable>,
    next_table_id: u64,
}

/// A durable key-value store over a single data directory.
///
/// The engine owns the directory exclusively (enforced with a lock file)
/// and recovers its state on open: SSTables are discovered by file name and
/// the WAL is replayed into a fresh memtable. There is no compaction:
/// repeated overwrites accumulate across SSTables and disk usage grows
/// until the directory is cleared externally.
pub struct LsmEngine {
    config: Config,
    wal: Wal,
    _lock: FileLock,
    inner: RwLock<Inner>,
}

impl LsmEngine {
    /// Opens the engine with default configuration.
    pub fn open(dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        Self::open_with_config(Config::new(dir))
    }

    /// Opens the engine, creating the data directory if needed, loading
    /// existing SSTables newest-first, and replaying the WAL.
    pub fn open_with_config(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;

        let lock = FileLock::lock(config.dir.join(LOCK_FILE))?;
        let wal = Wal::open(config.dir.join(WAL_FILE))?;

        let (tables, next_table_id) = load_tables(&config)?;

        let mut memtable = Memtable::new();
        let mut replayed = 0usize;
        for record in wal.replay()? {
            let record = record?;
            match record.op {
                Op::Put => memtable.put(record.key, record.value),
                Op::Delete => memtable.delete(record.key),
            }
            replayed += 1;
        }

        tracing::info!(
            dir = %config.dir.display(),
            sstables = tables.len(),
            wal_records = replayed,
            "opened storage engine"
        );

        Ok(Self {
            config,
            wal,
            _lock: lock,
            inner: RwLock::new(Inner {
                memtable,
                tables,
                next_table_id,
            }),
        })
    }

    /// Establishes or replaces the binding for `key`. Durable in the OS
    /// page cache once this returns; call [`LsmEngine::sync`] for
    /// storage-level durability.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        self.wal.append(Op::Put, key, value)?;
        inner.memtable.put(key.to_vec(), value.to_vec());
        self.maybe_flush(&mut inner)
    }

    /// Records a tombstone for `key`. Succeeds whether or not the key
    /// existed.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        self.wal.append(Op::Delete, key, b"")?;
        inner.memtable.delete(key.to_vec());
        self.maybe_flush(&mut inner)
    }

    /// Looks up `key`, newest layer first. A deleted key is
    /// indistinguishable from one that never existed.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.read().unwrap();

        if let Some(entry) = inner.memtable.get(key) {
            if entry.deleted {
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }

        for table in &inner.tables {
            if !table.might_contain(key) {
                continue;
            }
            match table.get(key) {
                Ok(Some(entry)) => {
                    if entry.deleted {
                        return Ok(None);
                    }
                    return Ok(Some(entry.value));
                }
                Ok(None) => {}
                // Best effort without checksums: treat an unreadable table
                // as not containing the key and keep searching older ones.
                Err(e) => {
                    tracing::error!(
                        table_id = table.id(),
                        error = %e,
                        "sstable lookup failed, skipping table"
                    );
                }
            }
        }

        Ok(None)
    }

    /// True iff `get` would return a value.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Flushes the memtable to a new SSTable regardless of its size. A
    /// no-op when the memtable is empty.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        self.flush_locked(&mut inner)
    }

    /// Forces buffered WAL writes down to storage.
    pub fn sync(&self) -> Result<()> {
        self.wal.sync()
    }

    /// Discards all in-memory state: empties the memtable and truncates
    /// the WAL. On-disk SSTables are not touched.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.memtable.clear();
        self.wal.checkpoint()
    }

    /// Approximate payload bytes in the memtable.
    pub fn memtable_size(&self) -> u64 {
        self.inner.read().unwrap().memtable.memory_usage() as u64
    }

    /// Number of SSTables currently stacked.
    pub fn sstable_count(&self) -> u64 {
        self.inner.read().unwrap().tables.len() as u64
    }

    /// Flushes after a mutation if the memtable has reached the limit.
    fn maybe_flush(&self, inner: &mut Inner) -> Result<()> {
        if inner.memtable.memory_usage() >= self.config.memtable_size_limit {
            self.flush_locked(inner)?;
        }
        Ok(())
    }

    /// Writes the memtable out, stacks a reader for the new table, and
    /// truncates the WAL. Caller holds the write lock.
    fn flush_locked(&self, inner: &mut Inner) -> Result<()> {
        if inner.memtable.is_empty() {
            return Ok(());
        }

        let id = inner.next_table_id;
        inner.next_table_id += 1;

        let path = table::write_memtable(&self.config.dir, id, &inner.memtable)?;
        let table = SSTable::open(id, path)?;
        let entries = table.entry_count();

        inner.tables.insert(0, table);
        inner.memtable.clear();
        self.wal.checkpoint()?;

        tracing::debug!(table_id = id, entries, "flushed memtable to sstable");
        Ok(())
    }
}

impl Drop for LsmEngine {
    fn drop(&mut self) {
        let mut inner = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !inner.memtable.is_empty() {
            if let Err(e) = self.flush_locked(&mut inner) {
                tracing::error!(error = %e, "failed to flush memtable on shutdown");
            }
        }
    }
}

/// Scans the data directory for `sstable_<id>.sst` files and opens them
/// newest-first. Returns the readers and the next id to allocate.
fn load_tables(config: &Config) -> Result<(Vec<SSTable>, u64)> {
    let mut found = Vec::new();
    for entry in fs::read_dir(&config.dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(id) = sstable::parse_file_name(name) {
            found.push((id, entry.path()));
        }
    }

    found.sort_by(|a, b| b.0.cmp(&a.0));
    let next_table_id = found.first().map_or(0, |(id, _)| id + 1);

    let mut tables = Vec::with_capacity(found.len());
    for (id, path) in found {
        tables.push(SSTable::open(id, path)?);
    }

    Ok((tables, next_table_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::Wal;
    use tempfile::TempDir;

    fn create_temp_dir() -> TempDir {
        TempDir::new().expect("Failed to create temp dir")
    }

    fn open_engine(dir: &TempDir) -> LsmEngine {
        LsmEngine::open(dir.path()).expect("Failed to open engine")
    }

    fn open_engine_with_limit(dir: &TempDir, limit: usize) -> LsmEngine {
        let config = Config::new(dir.path()).memtable_size_limit(limit);
        LsmEngine::open_with_config(config).expect("Failed to open engine")
    }

    fn get_str(engine: &LsmEngine, key: &str) -> Option<String> {
        engine
            .get(key.as_bytes())
            .expect("Lookup failed")
            .map(|value| String::from_utf8(value).expect("Value should be utf-8"))
    }

    #[test]
    fn test_put_get_and_overwrite() {
        let dir = create_temp_dir();
        let engine = open_engine(&dir);

        engine.put(b"name", b"Yash").expect("Put failed");
        engine.put(b"name", b"Yash Gulhane").expect("Put failed");

        assert_eq!(get_str(&engine, "name").as_deref(), Some("Yash Gulhane"));
        assert_eq!(get_str(&engine, "unknown"), None);
        assert!(engine.contains(b"name").expect("Contains failed"));
        assert!(!engine.contains(b"unknown").expect("Contains failed"));
    }

    #[test]
    fn test_delete_masks_value() {
        let dir = create_temp_dir();
        let engine = open_engine(&dir);

        engine.put(b"city", b"Delhi").expect("Put failed");
        engine.put(b"company", b"Samsung").expect("Put failed");
        engine.delete(b"city").expect("Delete failed");

        assert_eq!(get_str(&engine, "city"), None);
        assert_eq!(get_str(&engine, "company").as_deref(), Some("Samsung"));
    }

    #[test]
    fn test_delete_key_never_put() {
        let dir = create_temp_dir();
        let engine = open_engine(&dir);

        engine.delete(b"ghost").expect("Delete failed");
        assert_eq!(get_str(&engine, "ghost"), None);
        assert!(!engine.contains(b"ghost").expect("Contains failed"));
    }

    #[test]
    fn test_last_mutation_per_key_wins() {
        let dir = create_temp_dir();
        let engine = open_engine(&dir);

        engine.put(b"a", b"1").expect("Put failed");
        engine.put(b"b", b"2").expect("Put failed");
        engine.delete(b"a").expect("Delete failed");
        engine.put(b"a", b"3").expect("Put failed");
        engine.put(b"b", b"4").expect("Put failed");
        engine.delete(b"c").expect("Delete failed");

        assert_eq!(get_str(&engine, "a").as_deref(), Some("3"));
        assert_eq!(get_str(&engine, "b").as_deref(), Some("4"));
        assert_eq!(get_str(&engine, "c"), None);
    }

    #[test]
    fn test_reopen_after_drop_preserves_data() {
        let dir = create_temp_dir();

        {
            let engine = open_engine(&dir);
            engine.put(b"one", b"1").expect("Put failed");
            engine.put(b"two", b"2").expect("Put failed");
            engine.put(b"three", b"3").expect("Put failed");
            engine.delete(b"two").expect("Delete failed");
            // Drop flushes the memtable.
        }

        let engine = open_engine(&dir);
        assert_eq!(get_str(&engine, "one").as_deref(), Some("1"));
        assert_eq!(get_str(&engine, "two"), None);
        assert_eq!(get_str(&engine, "three").as_deref(), Some("3"));
        assert_eq!(engine.sstable_count(), 1);
    }

    #[test]
    fn test_open_replays_wal_left_by_crash() {
        let dir = create_temp_dir();

        // A crash leaves a populated wal.log and no final flush; build
        // exactly that state through the WAL itself.
        {
            let wal = Wal::open(dir.path().join("wal.log")).expect("Failed to open WAL");
            wal.append(crate::wal::Op::Put, b"one", b"1").expect("Append failed");
            wal.append(crate::wal::Op::Put, b"two", b"2").expect("Append failed");
            wal.append(crate::wal::Op::Put, b"three", b"3").expect("Append failed");
            wal.append(crate::wal::Op::Delete, b"two", b"").expect("Append failed");
        }

        let engine = open_engine(&dir);
        assert_eq!(engine.sstable_count(), 0);
        assert_eq!(get_str(&engine, "one").as_deref(), Some("1"));
        assert_eq!(get_str(&engine, "two"), None);
        assert_eq!(get_str(&engine, "three").as_deref(), Some("3"));
        assert!(engine.memtable_size() > 0);
    }

    #[test]
    fn test_flush_triggered_by_size_limit() {
        let dir = create_temp_dir();
        let engine = open_engine_with_limit(&dir, 1024);

        let value = [b'x'; 50];
        for i in 0..100 {
            let key = format!("key{i}");
            engine.put(key.as_bytes(), &value).expect("Put failed");
        }

        assert!(engine.sstable_count() > 0);
        for i in 0..100 {
            let key = format!("key{i}");
            let got = engine
                .get(key.as_bytes())
                .expect("Lookup failed")
                .unwrap_or_else(|| panic!("{key} should be present"));
            assert_eq!(got, value);
        }
    }

    #[test]
    fn test_recovery_with_sstables_and_tombstones() {
        let dir = create_temp_dir();

        {
            let engine = open_engine_with_limit(&dir, 1024);
            for i in 0..200 {
                let key = format!("key{i}");
                let value = format!("value{i}");
                engine.put(key.as_bytes(), value.as_bytes()).expect("Put failed");
            }
            for i in (0..=98).step_by(2) {
                let key = format!("key{i}");
                engine.delete(key.as_bytes()).expect("Delete failed");
            }
        }

        let engine = open_engine_with_limit(&dir, 1024);
        assert!(engine.sstable_count() > 0);
        assert_eq!(get_str(&engine, "key0"), None);
        assert_eq!(get_str(&engine, "key1").as_deref(), Some("value1"));
        assert_eq!(get_str(&engine, "key98"), None);
        assert_eq!(get_str(&engine, "key99").as_deref(), Some("value99"));
        assert_eq!(get_str(&engine, "key199").as_deref(), Some("value199"));
    }

    #[test]
    fn test_voluntary_flush_preserves_reads() {
        let dir = create_temp_dir();
        let engine = open_engine(&dir);

        engine.put(b"alpha", b"1").expect("Put failed");
        engine.put(b"beta", b"2").expect("Put failed");
        engine.delete(b"gamma").expect("Delete failed");

        engine.flush().expect("Flush failed");

        assert_eq!(engine.sstable_count(), 1);
        assert_eq!(engine.memtable_size(), 0);
        assert_eq!(get_str(&engine, "alpha").as_deref(), Some("1"));
        assert_eq!(get_str(&engine, "beta").as_deref(), Some("2"));
        assert_eq!(get_str(&engine, "gamma"), None);
    }

    #[test]
    fn test_wal_is_empty_after_flush() {
        let dir = create_temp_dir();
        let engine = open_engine(&dir);

        engine.put(b"key", b"value").expect("Put failed");
        let wal_path = dir.path().join("wal.log");
        assert!(std::fs::metadata(&wal_path).expect("Failed to stat").len() > 0);

        engine.flush().expect("Flush failed");
        assert_eq!(std::fs::metadata(&wal_path).expect("Failed to stat").len(), 0);
    }

    #[test]
    fn test_flush_on_empty_memtable_is_noop() {
        let dir = create_temp_dir();
        let engine = open_engine(&dir);

        engine.flush().expect("Flush failed");
        assert_eq!(engine.sstable_count(), 0);
    }

    #[test]
    fn test_freshness_across_layers() {
        let dir = create_temp_dir();
        let engine = open_engine(&dir);

        engine.put(b"k", b"v1").expect("Put failed");
        engine.flush().expect("Flush failed");

        engine.put(b"k", b"v2").expect("Put failed");
        assert_eq!(get_str(&engine, "k").as_deref(), Some("v2"));

        engine.flush().expect("Flush failed");
        assert_eq!(get_str(&engine, "k").as_deref(), Some("v2"));

        engine.delete(b"k").expect("Delete failed");
        assert_eq!(get_str(&engine, "k"), None);

        engine.flush().expect("Flush failed");
        assert_eq!(get_str(&engine, "k"), None);
        assert_eq!(engine.sstable_count(), 3);
    }

    #[test]
    fn test_clear_then_reopen() {
        let dir = create_temp_dir();

        {
            let engine = open_engine(&dir);
            for i in 0..1000 {
                let key = format!("key{i}");
                engine.put(key.as_bytes(), b"value").expect("Put failed");
            }

            engine.clear().expect("Clear failed");
            assert_eq!(engine.memtable_size(), 0);
            assert_eq!(get_str(&engine, "key0"), None);

            engine.put(b"after", b"checkpoint").expect("Put failed");
        }

        let engine = open_engine(&dir);
        assert_eq!(get_str(&engine, "after").as_deref(), Some("checkpoint"));
        assert_eq!(get_str(&engine, "key0"), None);
        assert_eq!(engine.sstable_count(), 1);
    }

    #[test]
    fn test_sync_succeeds() {
        let dir = create_temp_dir();
        let engine = open_engine(&dir);

        engine.put(b"key", b"value").expect("Put failed");
        engine.sync().expect("Sync failed");
        assert_eq!(get_str(&engine, "key").as_deref(), Some("value"));
    }

    #[test]
    fn test_table_ids_keep_growing_across_reopens() {
        let dir = create_temp_dir();

        {
            let engine = open_engine(&dir);
            engine.put(b"first", b"1").expect("Put failed");
            engine.flush().expect("Flush failed");
        }
        {
            let engine = open_engine(&dir);
            engine.put(b"second", b"2").expect("Put failed");
            engine.flush().expect("Flush failed");
        }

        let engine = open_engine(&dir);
        assert_eq!(engine.sstable_count(), 2);
        assert!(dir.path().join("sstable_0.sst").exists());
        assert!(dir.path().join("sstable_1.sst").exists());
        assert_eq!(get_str(&engine, "first").as_deref(), Some("1"));
        assert_eq!(get_str(&engine, "second").as_deref(), Some("2"));
    }

    #[test]
    fn test_newer_table_shadows_older() {
        let dir = create_temp_dir();
        let engine = open_engine(&dir);

        engine.put(b"key", b"old").expect("Put failed");
        engine.flush().expect("Flush failed");
        engine.put(b"key", b"new").expect("Put failed");
        engine.flush().expect("Flush failed");

        assert_eq!(engine.sstable_count(), 2);
        assert_eq!(get_str(&engine, "key").as_deref(), Some("new"));
    }

    #[test]
    fn test_concurrent_readers() {
        use std::sync::Arc;
        use std::thread;

        let dir = create_temp_dir();
        let engine = open_engine_with_limit(&dir, 1024);

        for i in 0..100 {
            let key = format!("key{i:03}");
            let value = format!("value{i:03}");
            engine.put(key.as_bytes(), value.as_bytes()).expect("Put failed");
        }

        let engine = Arc::new(engine);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("key{i:03}");
                    let value = engine
                        .get(key.as_bytes())
                        .expect("Lookup failed")
                        .unwrap_or_else(|| panic!("{key} should be present"));
                    assert_eq!(value, format!("value{i:03}").into_bytes());
                }
            }));
        }
        for handle in handles {
            handle.join().expect("Reader thread panicked");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_second_engine_on_same_dir_is_rejected() {
        let dir = create_temp_dir();
        let _engine = open_engine(&dir);

        assert!(LsmEngine::open(dir.path()).is_err());
    }

    #[test]
    fn test_empty_key_and_empty_value() {
        let dir = create_temp_dir();
        let engine = open_engine(&dir);

        engine.put(b"", b"empty-key").expect("Put failed");
        engine.put(b"empty-value", b"").expect("Put failed");

        assert_eq!(
            engine.get(b"").expect("Lookup failed"),
            Some(b"empty-key".to_vec())
        );
        // An empty value is present, not absent.
        assert_eq!(
            engine.get(b"empty-value").expect("Lookup failed"),
            Some(Vec::new())
        );

        engine.flush().expect("Flush failed");
        assert_eq!(
            engine.get(b"").expect("Lookup failed"),
            Some(b"empty-key".to_vec())
        );
        assert_eq!(
            engine.get(b"empty-value").expect("Lookup failed"),
            Some(Vec::new())
        );
    }
}
