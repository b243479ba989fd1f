//! Crash simulation for journal recovery tests.
//!
//! [`CrashableBackend`] wraps a real backend and, once armed, fails
//! mid-write after a byte budget, leaving a torn record behind exactly as a
//! process killed during `write` would. Every mutating call after the crash
//! fails too, so the store cannot repair the tail until it is reopened.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let bytes = InMemoryBackend::new();
//! let backend = CrashableBackend::new(Box::new(bytes.clone()));
//! let control = backend.control();
//! let store = LocalStore::open_with_backend(Box::new(backend), StoreConfig::default())?;
//! control.crash_after(8);
//! // ... commit fails; reopen a store over `bytes` to recover
//! ```

use fieldsync_storage::{StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_flush: AtomicBool,
}

/// Shared switch for a [`CrashableBackend`] owned by a store.
#[derive(Debug, Clone)]
pub struct CrashControl {
    state: Arc<CrashState>,
}

impl CrashControl {
    /// Crashes once `bytes` more bytes have been written.
    pub fn crash_after(&self, bytes: usize) {
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether flush and sync should fail.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.state.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Disarms and clears the crash state.
    pub fn reset(&self) {
        self.state.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.state.bytes_written.store(0, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.fail_on_flush.store(false, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    state: Arc<CrashState>,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            state: Arc::new(CrashState {
                crash_after_bytes: AtomicUsize::new(usize::MAX),
                bytes_written: AtomicUsize::new(0),
                crashed: AtomicBool::new(false),
                fail_on_flush: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a control handle that outlives moving the backend into a store.
    pub fn control(&self) -> CrashControl {
        CrashControl {
            state: Arc::clone(&self.state),
        }
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    fn crash(&self, message: &str) -> StorageError {
        self.state.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(io::ErrorKind::Other, message.to_string()))
    }

    fn check_alive(&self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(self.crash("backend crashed"));
        }
        Ok(())
    }

    fn check_flush(&self, what: &str) -> StorageResult<()> {
        self.check_alive()?;
        if self.state.fail_on_flush.load(Ordering::SeqCst) {
            return Err(self.crash(&format!("simulated crash during {what}")));
        }
        Ok(())
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.check_alive()?;
        let current = self.state.bytes_written.fetch_add(data.len(), Ordering::SeqCst);
        let crash_threshold = self.state.crash_after_bytes.load(Ordering::SeqCst);

        if current >= crash_threshold {
            return Err(self.crash("simulated crash during write"));
        }

        // Check if this write will cross the crash threshold
        if current + data.len() > crash_threshold {
            let partial_len = crash_threshold - current;
            if partial_len > 0 {
                self.inner.append(&data[..partial_len])?;
            }
            return Err(self.crash("simulated crash during partial write"));
        }

        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_flush("flush")?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_flush("sync")?;
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_alive()?;
        self.inner.truncate(new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::{CoreError, EntityId, LocalStore, Mutation, NewDailyLog, StoreConfig};
    use fieldsync_storage::InMemoryBackend;

    fn enqueue(store: &LocalStore, date: &str) -> Result<(), CoreError> {
        store.transaction(|txn| {
            store.actions().enqueue(
                txn,
                EntityId::new_local(),
                Mutation::CreateDailyLog(NewDailyLog::new("prj_1", date)),
                0,
            );
            Ok::<_, CoreError>(())
        })
    }

    #[test]
    fn normal_operation_passes_through() {
        let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()));

        let data = b"test data";
        let offset = backend.append(data).unwrap();
        backend.flush().unwrap();

        let read = backend.read_at(offset, data.len()).unwrap();
        assert_eq!(read, data);
    }

    #[test]
    fn crash_writes_partial_data_then_refuses_everything() {
        let bytes = InMemoryBackend::new();
        let mut backend = CrashableBackend::new(Box::new(bytes.clone()));
        let control = backend.control();
        control.crash_after(10);

        backend.append(&[1u8; 5]).unwrap();
        assert!(backend.append(&[2u8; 10]).is_err());
        assert!(control.has_crashed());
        assert_eq!(bytes.data().len(), 10);

        assert!(backend.truncate(5).is_err());
        assert!(backend.append(&[3u8; 1]).is_err());
        assert_eq!(bytes.data().len(), 10);
    }

    #[test]
    fn crash_on_flush() {
        let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()));
        backend.control().set_fail_on_flush(true);

        assert!(backend.flush().is_err());
        assert!(backend.has_crashed());
    }

    #[test]
    fn torn_commit_is_discarded_on_restart() {
        let bytes = InMemoryBackend::new();
        let backend = CrashableBackend::new(Box::new(bytes.clone()));
        let control = backend.control();
        let store = LocalStore::open_with_backend(Box::new(backend), StoreConfig::default()).unwrap();

        enqueue(&store, "2025-01-10").unwrap();
        control.crash_after(12);
        assert!(enqueue(&store, "2025-01-11").is_err());
        // The failed commit is not visible even before restart.
        assert_eq!(store.counts().pending_actions, 1);
        drop(store);

        let store = LocalStore::open_with_backend(Box::new(bytes), StoreConfig::default()).unwrap();
        let actions = store.list_actions(None);
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0].mutation,
            Mutation::CreateDailyLog(draft) if draft.date == "2025-01-10"
        ));
    }
}
