//! Streaming downloads into the cache, with observable progress.

use super::eviction::{CacheEvictionManager, EvictionReport};
use crate::error::{SyncError, SyncResult};
use fieldsync_core::Clock;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::watch;
use tracing::{debug, warn};

const CHUNK_SIZE: usize = 64 * 1024;

/// State of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Bytes are still arriving.
    Downloading,
    /// Content is in the cache.
    Complete,
    /// The download stopped; nothing was cached.
    Failed,
}

/// Progress snapshot published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// 0 to 100, never decreasing.
    pub percent: u8,
    /// Current state.
    pub status: DownloadStatus,
}

/// Publishes the progress of one download.
///
/// Clones share the same channel.
#[derive(Debug, Clone)]
pub struct DownloadTracker {
    sender: Arc<watch::Sender<DownloadProgress>>,
}

impl DownloadTracker {
    /// Creates a tracker at 0% `Downloading`.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(DownloadProgress {
            percent: 0,
            status: DownloadStatus::Downloading,
        });
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Observes progress updates.
    pub fn subscribe(&self) -> watch::Receiver<DownloadProgress> {
        self.sender.subscribe()
    }

    /// Latest published progress.
    pub fn current(&self) -> DownloadProgress {
        *self.sender.borrow()
    }

    /// Publishes a percentage. Values above 100 are clamped and values below
    /// the current one are ignored.
    pub fn set_percent(&self, percent: u8) {
        let percent = percent.min(100);
        self.sender.send_if_modified(|progress| {
            if progress.status != DownloadStatus::Downloading || percent <= progress.percent {
                return false;
            }
            progress.percent = percent;
            true
        });
    }

    /// Publishes progress from byte counts. Without a known total only
    /// completion moves the percentage.
    pub fn update_bytes(&self, received: u64, total: Option<u64>) {
        if let Some(total) = total.filter(|total| *total > 0) {
            let percent = (received.saturating_mul(100) / total).min(100);
            self.set_percent(percent as u8);
        }
    }

    /// Marks the download complete at 100%.
    pub fn complete(&self) {
        self.sender.send_modify(|progress| {
            progress.percent = 100;
            progress.status = DownloadStatus::Complete;
        });
    }

    /// Marks the download failed, keeping the last percentage.
    pub fn fail(&self) {
        self.sender.send_modify(|progress| progress.status = DownloadStatus::Failed);
    }
}

impl Default for DownloadTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Where downloadable content comes from.
pub trait ContentSource: Send + Sync {
    /// Opens the content of `file_id`, with its length if known.
    ///
    /// # Errors
    ///
    /// Remote failures, classified like any other remote call.
    fn open(&self, file_id: &str) -> SyncResult<(Box<dyn Read + Send>, Option<u64>)>;
}

/// A download that landed in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    /// Remote file id.
    pub file_id: String,
    /// Location in the cache directory.
    pub path: PathBuf,
    /// Bytes written.
    pub size_bytes: u64,
    /// Eviction run triggered by the registration.
    pub eviction: EvictionReport,
}

/// Streams remote content into the cache.
pub struct DownloadManager<C: Clock> {
    cache: Arc<CacheEvictionManager<C>>,
}

impl<C: Clock> DownloadManager<C> {
    /// Creates a manager writing into `cache`.
    pub fn new(cache: Arc<CacheEvictionManager<C>>) -> Self {
        Self { cache }
    }

    /// The cache downloads are registered with.
    pub fn cache(&self) -> &Arc<CacheEvictionManager<C>> {
        &self.cache
    }

    /// Downloads `file_id` into the cache, publishing progress to `tracker`.
    ///
    /// Content is written to a temporary file and renamed into place only
    /// once complete. On failure the partial file is removed, nothing is
    /// registered and the tracker ends `Failed`. Content larger than the
    /// cache size bound is evicted on registration and reported as a
    /// precondition failure.
    ///
    /// # Errors
    ///
    /// Source errors as classified by the source; streaming failures as
    /// retryable transport errors; local store failures.
    pub fn download(
        &self,
        file_id: &str,
        source: &dyn ContentSource,
        tracker: &DownloadTracker,
    ) -> SyncResult<CachedFile> {
        let path = self.cache.path_for(file_id);

        let (temp, size_bytes) = match self.stream(file_id, source, tracker) {
            Ok(streamed) => streamed,
            Err(e) => {
                tracker.fail();
                warn!(file_id, error = %e, "download failed");
                return Err(e);
            }
        };

        if let Err(e) = temp.persist(&path) {
            tracker.fail();
            return Err(e.error.into());
        }

        let eviction = match self.cache.register(file_id, &path, size_bytes) {
            Ok(eviction) => eviction,
            Err(e) => {
                tracker.fail();
                discard(&path);
                return Err(e);
            }
        };
        if eviction.evicted.iter().any(|evicted| evicted == file_id) {
            tracker.fail();
            let max_size_bytes = self.cache.config().max_size_bytes;
            warn!(file_id, size_bytes, max_size_bytes, "download larger than the cache");
            return Err(SyncError::Precondition(format!(
                "{file_id} is {size_bytes} bytes, cache holds at most {max_size_bytes}"
            )));
        }
        tracker.complete();
        debug!(file_id, size_bytes, "download complete");

        Ok(CachedFile {
            file_id: file_id.to_string(),
            path,
            size_bytes,
            eviction,
        })
    }

    /// Streams into a fresh temporary file in the cache directory. Every
    /// download gets its own file, and it is removed when dropped unpersisted.
    fn stream(
        &self,
        file_id: &str,
        source: &dyn ContentSource,
        tracker: &DownloadTracker,
    ) -> SyncResult<(NamedTempFile, u64)> {
        let (mut reader, total) = source.open(file_id)?;
        let interrupted = |e: io::Error| SyncError::transport(format!("download interrupted: {e}"));

        let cache_dir = &self.cache.config().cache_dir;
        fs::create_dir_all(cache_dir).map_err(interrupted)?;
        let mut temp = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".part")
            .tempfile_in(cache_dir)
            .map_err(interrupted)?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut received: u64 = 0;

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(interrupted(e)),
            };
            temp.write_all(&buf[..n]).map_err(interrupted)?;
            received += n as u64;
            tracker.update_bytes(received, total);
        }

        if let Some(total) = total {
            if received != total {
                return Err(SyncError::transport(format!(
                    "short download: {received} of {total} bytes"
                )));
            }
        }
        temp.as_file().sync_all().map_err(interrupted)?;
        Ok((temp, received))
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove cached file");
        }
    }
}
