//! Age and size bounds for the binary cache.

use crate::config::CacheConfig;
use crate::error::SyncResult;
use fieldsync_core::{CacheEntry, Clock, LocalStore, SystemClock};
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one eviction run removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Entries removed for exceeding the age bound.
    pub expired: usize,
    /// Entries removed to get under the size bound.
    pub oversize: usize,
    /// Bytes accounted to removed entries.
    pub bytes_freed: u64,
    /// Total size of the entries left.
    pub remaining_bytes: u64,
    /// Ids of removed entries, in removal order.
    pub evicted: Vec<String>,
}

impl EvictionReport {
    /// Number of entries removed.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.expired + self.oversize
    }
}

/// Keeps the binary cache within its age and size bounds.
///
/// Eviction order is `downloaded_at` ascending, ties broken by file id, so an
/// entry is never removed while an older one is kept. Files are deleted
/// before their records; a record whose file is gone is cleaned up by
/// [`lookup`](Self::lookup).
pub struct CacheEvictionManager<C: Clock = SystemClock> {
    store: Arc<LocalStore>,
    config: CacheConfig,
    clock: C,
    lock: Mutex<()>,
}

impl CacheEvictionManager<SystemClock> {
    /// Creates a manager reading the system clock.
    pub fn new(store: Arc<LocalStore>, config: CacheConfig) -> Self {
        Self::with_clock(store, config, SystemClock)
    }
}

impl<C: Clock> CacheEvictionManager<C> {
    /// Creates a manager with an explicit clock.
    pub fn with_clock(store: Arc<LocalStore>, config: CacheConfig, clock: C) -> Self {
        Self {
            store,
            config,
            clock,
            lock: Mutex::new(()),
        }
    }

    /// The cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The local store holding cache records.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Where content for `file_id` is stored.
    pub fn path_for(&self, file_id: &str) -> PathBuf {
        let name: String = file_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.config.cache_dir.join(name)
    }

    /// Sum of all recorded entry sizes.
    pub fn total_size(&self) -> u64 {
        self.store
            .list_cache_entries()
            .iter()
            .map(|entry| entry.size_bytes)
            .sum()
    }

    /// Records a completed download, then evicts.
    ///
    /// Registration and eviction run as one critical section.
    ///
    /// # Errors
    ///
    /// Local store failures.
    pub fn register(
        &self,
        file_id: &str,
        path: impl AsRef<Path>,
        size_bytes: u64,
    ) -> SyncResult<EvictionReport> {
        let _guard = self.lock.lock();
        let entry = CacheEntry::downloaded(file_id, path.as_ref(), size_bytes, self.clock.now());
        self.store.transaction(|txn| -> SyncResult<_> {
            txn.put_cache_entry(entry);
            Ok(())
        })?;
        debug!(file_id, size_bytes, "cache entry registered");
        self.evict_locked()
    }

    /// Removes expired entries, then the oldest entries until the total size
    /// is within bounds.
    ///
    /// # Errors
    ///
    /// Local store failures. File removal failures are logged and ignored.
    pub fn evict(&self) -> SyncResult<EvictionReport> {
        let _guard = self.lock.lock();
        self.evict_locked()
    }

    fn evict_locked(&self) -> SyncResult<EvictionReport> {
        let now = self.clock.now();
        let max_age = u64::try_from(self.config.max_age.as_millis()).unwrap_or(u64::MAX);
        let cutoff = now.saturating_sub(max_age);

        let mut entries = self.store.list_cache_entries();
        entries.sort_by(|a, b| {
            a.downloaded_at
                .cmp(&b.downloaded_at)
                .then_with(|| a.file_id.cmp(&b.file_id))
        });

        let (expired, kept): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|entry| entry.downloaded_at < cutoff);

        let mut remaining: u64 = kept.iter().map(|entry| entry.size_bytes).sum();
        let mut oversize = Vec::new();
        for entry in kept {
            if remaining <= self.config.max_size_bytes {
                break;
            }
            remaining -= entry.size_bytes;
            oversize.push(entry);
        }

        let mut report = EvictionReport {
            expired: expired.len(),
            oversize: oversize.len(),
            remaining_bytes: remaining,
            ..EvictionReport::default()
        };
        if report.removed() == 0 {
            return Ok(report);
        }

        for entry in expired.iter().chain(oversize.iter()) {
            remove_file_best_effort(&entry.local_path);
            report.bytes_freed += entry.size_bytes;
            report.evicted.push(entry.file_id.clone());
        }
        self.store.transaction(|txn| -> SyncResult<_> {
            for file_id in &report.evicted {
                txn.delete_cache_entry(file_id);
            }
            Ok(())
        })?;

        info!(
            expired = report.expired,
            oversize = report.oversize,
            bytes_freed = report.bytes_freed,
            remaining_bytes = report.remaining_bytes,
            "cache evicted"
        );
        Ok(report)
    }

    /// Records a read of cached content. Does not affect eviction order.
    ///
    /// Returns false if the entry is unknown.
    ///
    /// # Errors
    ///
    /// Local store failures.
    pub fn touch(&self, file_id: &str) -> SyncResult<bool> {
        let now = self.clock.now();
        self.store.transaction(|txn| -> SyncResult<_> {
            let Some(mut entry) = txn.get_cache_entry(file_id) else {
                return Ok(false);
            };
            entry.last_accessed_at = now;
            txn.put_cache_entry(entry);
            Ok(true)
        })
    }

    /// Returns the entry if its content is still on disk.
    ///
    /// A record whose file has disappeared is deleted.
    ///
    /// # Errors
    ///
    /// Local store failures.
    pub fn lookup(&self, file_id: &str) -> SyncResult<Option<CacheEntry>> {
        let _guard = self.lock.lock();
        let Some(entry) = self.store.get_cache_entry(file_id) else {
            return Ok(None);
        };
        if entry.local_path.exists() {
            return Ok(Some(entry));
        }

        debug!(file_id, path = %entry.local_path.display(), "dropping stale cache record");
        self.store.transaction(|txn| -> SyncResult<_> {
            txn.delete_cache_entry(file_id);
            Ok(())
        })?;
        Ok(None)
    }
}

fn remove_file_best_effort(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "cached file removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove cached file"),
    }
}
