use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Exclusive advisory lock on the data directory, held for the lifetime of
/// the engine. The lock file records the owning process id for debugging.
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Creates the lock file (truncating any stale contents) and acquires
    /// the lock. Fails if another process already holds it.
    pub fn lock<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Self::acquire(&file)?;

        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn acquire(file: &File) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn acquire(_file: &File) -> io::Result<()> {
        // No advisory locking on this platform; single-process use assumed.
        Ok(())
    }

    /// The path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// The OS releases the lock when the file handle is dropped. The lock file
// itself is left behind to avoid unlink races with a concurrent opener.
