//! Test fixtures and store helpers.
//!
//! Provides stores that clean up after themselves and can be "restarted"
//! over the same durable bytes.

use fieldsync_core::{CacheEntry, CoreError, LocalStore, StoreConfig, Timestamp};
use fieldsync_storage::InMemoryBackend;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

enum Durable {
    Memory(InMemoryBackend),
    Dir(TempDir),
}

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<LocalStore>,
    durable: Durable,
}

impl TestStore {
    /// Creates a store journaling to memory.
    pub fn memory() -> Self {
        let backend = InMemoryBackend::new();
        let store = LocalStore::open_with_backend(Box::new(backend.clone()), StoreConfig::default())
            .expect("Failed to open in-memory store");
        Self {
            store: Arc::new(store),
            durable: Durable::Memory(backend),
        }
    }

    /// Creates a store in a temporary directory.
    pub fn dir() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = LocalStore::open(&temp_dir.path().join("store"), StoreConfig::default())
            .expect("Failed to open directory store");
        Self {
            store: Arc::new(store),
            durable: Durable::Dir(temp_dir),
        }
    }

    /// Returns the store directory if directory-based.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.durable {
            Durable::Dir(dir) => Some(dir.path().join("store")),
            Durable::Memory(_) => None,
        }
    }

    /// Journal bytes of a memory store.
    pub fn backend(&self) -> Option<&InMemoryBackend> {
        match &self.durable {
            Durable::Memory(backend) => Some(backend),
            Durable::Dir(_) => None,
        }
    }

    /// Simulates process death and relaunch: drops this handle and reopens
    /// the store from its durable bytes.
    ///
    /// Other `Arc`s to the old store must be dropped first; a directory store
    /// stays locked while any handle lives.
    ///
    /// # Errors
    ///
    /// Replay errors from the reopened journal.
    pub fn restart(self) -> Result<Self, CoreError> {
        let Self { store, durable } = self;
        drop(store);

        let store = match &durable {
            Durable::Memory(backend) => {
                LocalStore::open_with_backend(Box::new(backend.clone()), StoreConfig::default())?
            }
            Durable::Dir(dir) => LocalStore::open(&dir.path().join("store"), StoreConfig::default())?,
        };
        Ok(Self {
            store: Arc::new(store),
            durable,
        })
    }
}

impl std::ops::Deref for TestStore {
    type Target = LocalStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&LocalStore) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Writes `content` to `dir/name`, creating `dir`, and returns the path.
pub fn seed_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    std::fs::create_dir_all(dir).expect("Failed to create directory");
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write file");
    path
}

/// Writes a cached file of `size` bytes and records it with an explicit
/// download time.
pub fn seed_cache_entry(
    store: &LocalStore,
    dir: &Path,
    file_id: &str,
    size: u64,
    downloaded_at: Timestamp,
) -> CacheEntry {
    let path = seed_file(dir, file_id, &vec![0u8; size as usize]);
    let entry = CacheEntry::downloaded(file_id, path, size, downloaded_at);
    store
        .transaction(|txn| {
            txn.put_cache_entry(entry.clone());
            Ok::<_, CoreError>(())
        })
        .expect("Failed to record cache entry");
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::{EntityId, Mutation, NewDailyLog};

    fn enqueue(store: &LocalStore) {
        store
            .transaction(|txn| {
                store.actions().enqueue(
                    txn,
                    EntityId::new_local(),
                    Mutation::CreateDailyLog(NewDailyLog::new("prj_1", "2025-01-10")),
                    0,
                );
                Ok::<_, CoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn memory_store_survives_restart() {
        let test_store = TestStore::memory();
        enqueue(&test_store);
        assert!(test_store.backend().unwrap().data().len() > 0);

        let test_store = test_store.restart().unwrap();
        assert_eq!(test_store.counts().pending_actions, 1);
    }

    #[test]
    fn dir_store_survives_restart() {
        let test_store = TestStore::dir();
        assert!(test_store.path().unwrap().join("journal.log").exists());
        enqueue(&test_store);

        let test_store = test_store.restart().unwrap();
        assert_eq!(test_store.counts().pending_actions, 1);
    }

    #[test]
    fn seeded_cache_entry_has_file() {
        let dir = TempDir::new().unwrap();
        with_temp_store(|store| {
            let entry = seed_cache_entry(store, dir.path(), "doc_1", 64, 5);
            assert_eq!(std::fs::metadata(&entry.local_path).unwrap().len(), 64);
            assert_eq!(store.get_cache_entry("doc_1").unwrap().downloaded_at, 5);
        });
    }
}
