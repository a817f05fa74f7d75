use std::fmt::Display;
use std::io;

/// EmberDB errors.
#[derive(Debug)]
pub enum Error {
    /// An underlying file operation failed (open, read, write, seek,
    /// truncate). Fatal for engine construction, surfaced per-mutation
    /// otherwise.
    Io(io::Error),
    /// A WAL record or SSTable entry could not be parsed. In the WAL this
    /// ends recovery at that point; in an SSTable it fails the lookup.
    Corruption(String),
    /// An impossible internal state, e.g. an unreadable SSTable footer.
    InvalidState(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::InvalidState(msg) => write!(f, "invalid state: {msg}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// An EmberDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;
