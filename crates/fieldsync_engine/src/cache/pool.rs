//! Bounded concurrent downloads on the blocking pool.

use super::download::{CachedFile, ContentSource, DownloadManager, DownloadTracker};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use fieldsync_core::Clock;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs downloads on the blocking pool with bounded concurrency.
pub struct DownloadPool<C: Clock> {
    manager: Arc<DownloadManager<C>>,
    permits: Arc<Semaphore>,
}

impl<C: Clock + 'static> DownloadPool<C> {
    /// Creates a pool allowing `concurrency` downloads at once (at least 1).
    pub fn new(manager: Arc<DownloadManager<C>>, concurrency: usize) -> Self {
        Self {
            manager,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Creates a pool sized by `config.download_concurrency`.
    pub fn from_config(manager: Arc<DownloadManager<C>>, config: &SyncConfig) -> Self {
        Self::new(manager, config.download_concurrency)
    }

    /// Free download slots.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Downloads `file_id`, waiting for a free slot first.
    ///
    /// # Errors
    ///
    /// See [`DownloadManager::download`].
    pub async fn download(
        &self,
        file_id: impl Into<String>,
        source: Arc<dyn ContentSource>,
        tracker: DownloadTracker,
    ) -> SyncResult<CachedFile> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| SyncError::Cancelled)?;

        let manager = Arc::clone(&self.manager);
        let file_id = file_id.into();
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            manager.download(&file_id, source.as_ref(), &tracker)
        })
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(e) => Err(SyncError::transport(format!("download task failed: {e}"))),
        }
    }
}
