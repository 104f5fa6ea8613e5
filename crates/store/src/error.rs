//! Error taxonomy for the store.

use std::io;
use thiserror::Error;

/// The result type used throughout the store.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for store operations, partitioned by failure domain.
#[derive(Debug, Error)]
pub enum Error {
    /// The WAL contains data that cannot be interpreted (bad magic, bad CRC
    /// on a segment head).
    #[error("wal corruption: {0}")]
    WalCorruption(String),

    /// An SSTable operation failed (format, out-of-order add, read failure).
    #[error(transparent)]
    SSTable(#[from] sstable::SSTableError),

    /// Persistent state could not be reconstructed at open.
    #[error("recovery failed: {0}")]
    Recovery(String),

    /// A compaction failed; inputs stay referenced and the store remains
    /// operational.
    #[error("compaction failed: {0}")]
    Compaction(String),

    /// An I/O error outside the domains above.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The caller passed something unusable (empty key, hi < lo, bad
    /// configuration).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn recovery(msg: impl Into<String>) -> Self {
        Error::Recovery(msg.into())
    }

    pub(crate) fn compaction(msg: impl Into<String>) -> Self {
        Error::Compaction(msg.into())
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// `true` for errors a caller can expect to clear by retrying. Today
    /// that is a read racing a compaction swap, which observes
    /// file-not-found on an unlinked input table. A retry sees the swapped
    /// catalog and succeeds.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            Error::SSTable(sstable::SSTableError::Io(e)) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<wal::WalError> for Error {
    fn from(err: wal::WalError) -> Self {
        match err {
            wal::WalError::Io(e) => Error::Io(e),
            wal::WalError::Corruption(msg) => Error::WalCorruption(msg),
        }
    }
}
