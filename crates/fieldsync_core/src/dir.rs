//! Store directory management.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ journal.log       # Append-only transaction journal
//! └─ journal.log.tmp   # Compaction output before the atomic rename
//! ```
//!
//! The LOCK file ensures only one process can write to the store at a time.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.log";
const JOURNAL_TEMP: &str = "journal.log.tmp";

/// Holds the exclusive lock on a store directory.
///
/// Only one `StoreDir` can exist per directory at a time, across processes.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `StoreLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_directory(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_directory(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the journal file.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// Replaces the journal with `data` atomically.
    ///
    /// 1. Write to the temporary file
    /// 2. Sync it to disk
    /// 3. Rename over `journal.log`
    /// 4. Fsync the directory so the rename is durable
    ///
    /// Open handles on the old journal keep pointing at the replaced file, so
    /// callers must reopen it afterwards.
    pub fn replace_journal(&self, data: &[u8]) -> CoreResult<()> {
        let temp_path = self.path.join(JOURNAL_TEMP);

        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.journal_path())?;
        self.sync_directory()
    }

    /// Removes a compaction temp file left behind by a crash.
    pub fn remove_stale_temp(&self) -> CoreResult<bool> {
        let temp_path = self.path.join(JOURNAL_TEMP);
        if temp_path.exists() {
            fs::remove_file(&temp_path)?;
            return Ok(true);
        }
        Ok(false)
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced.
        Ok(())
    }
}
