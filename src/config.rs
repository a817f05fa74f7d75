use std::path::PathBuf;

/// Configuration for the LSM engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory path for the database.
    pub dir: PathBuf,

    /// Memtable payload bytes that trigger a flush (default: 4 MiB).
    pub memtable_size_limit: usize,

    /// Maximum number of SSTables before compaction would kick in
    /// (default: 10). Recognized but currently unused; reserved for a
    /// future compactor.
    pub max_sstables: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./emberdb"),
            memtable_size_limit: 4 * 1024 * 1024,
            max_sstables: 10,
        }
    }
}

impl Config {
    /// Create a new config with the given data directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the memtable flush threshold in bytes.
    pub fn memtable_size_limit(mut self, limit: usize) -> Self {
        self.memtable_size_limit = limit;
        self
    }

    /// Set the SSTable count limit.
    pub fn max_sstables(mut self, max: usize) -> Self {
        self.max_sstables = max;
        self
    }
}
