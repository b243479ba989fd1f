//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Clones share the same bytes. Dropping a store and opening a new one on a
/// clone of its backend is how tests simulate an app restart.
///
/// # Example
///
/// ```rust
/// use fieldsync_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let shared = backend.clone();
/// backend.append(b"queued").unwrap();
/// assert_eq!(shared.size().unwrap(), 6);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend preloaded with `data`.
    ///
    /// Useful for recovery tests that start from a torn journal.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of all bytes in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrites all bytes, visible to every clone.
    ///
    /// Tests use this to inject torn writes and bit flips.
    pub fn replace_data(&self, data: Vec<u8>) {
        *self.data.write() = data;
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.data.read();
        StorageError::check_read(offset, len, bytes.len() as u64)?;
        let start = offset as usize;
        Ok(bytes[start..start + len].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut bytes = self.data.write();
        let start = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(start)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut bytes = self.data.write();
        StorageError::check_shrink(new_size, bytes.len() as u64)?;
        bytes.truncate(new_size as usize);
        Ok(())
    }
}
