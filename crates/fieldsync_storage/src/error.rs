//! Byte store errors.

use std::io;
use thiserror::Error;

/// Result alias used by every backend.
pub type StorageResult<T> = Result<T, StorageError>;

/// Failures a backend can report to the journal.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The operating system rejected a read, write or sync.
    #[error("journal I/O failed: {0}")]
    Io(#[from] io::Error),

    /// A read asked for bytes the store does not hold.
    #[error("read of {len} bytes at {offset} is outside a {size}-byte store")]
    ReadPastEnd {
        /// Start of the requested range.
        offset: u64,
        /// Length of the requested range.
        len: usize,
        /// Bytes currently held.
        size: u64,
    },

    /// `truncate` was asked to grow the store.
    #[error("cannot truncate to {requested} bytes, store holds {size}")]
    TruncateBeyondEnd {
        /// Requested new size.
        requested: u64,
        /// Bytes currently held.
        size: u64,
    },
}

impl StorageError {
    /// Checks that `len` bytes at `offset` lie inside a store of `size` bytes.
    pub(crate) fn check_read(offset: u64, len: usize, size: u64) -> StorageResult<()> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= size => Ok(()),
            _ => Err(Self::ReadPastEnd { offset, len, size }),
        }
    }

    /// Checks that truncating to `requested` does not grow the store.
    pub(crate) fn check_shrink(requested: u64, size: u64) -> StorageResult<()> {
        if requested > size {
            Err(Self::TruncateBeyondEnd { requested, size })
        } else {
            Ok(())
        }
    }
}
