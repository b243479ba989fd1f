//! Local store configuration.

/// Journal size above which a directory store compacts itself on open.
pub const DEFAULT_COMPACT_ON_OPEN_BYTES: u64 = 8 * 1024 * 1024;

/// Options for [`crate::LocalStore::open`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Create the store directory when it is absent. Maintenance tools turn
    /// this off so a mistyped path is reported instead of silently created.
    pub create_if_missing: bool,

    /// Flush the journal after every committed transaction.
    pub sync_on_commit: bool,

    /// Compact a directory store on open once its journal exceeds this many
    /// bytes. `None` leaves compaction to explicit calls.
    pub compact_on_open_bytes: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            compact_on_open_bytes: Some(DEFAULT_COMPACT_ON_OPEN_BYTES),
        }
    }
}

impl StoreConfig {
    /// Default store options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether opening creates a missing store directory.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether each commit is flushed before `transaction` returns.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the journal size that triggers compaction on open.
    #[must_use]
    pub const fn compact_on_open(mut self, threshold: Option<u64>) -> Self {
        self.compact_on_open_bytes = threshold;
        self
    }

    /// Whether a journal of `journal_bytes` should be compacted on open.
    #[must_use]
    pub fn wants_compaction(&self, journal_bytes: u64) -> bool {
        self.compact_on_open_bytes
            .is_some_and(|threshold| journal_bytes > threshold)
    }
}
