//! The durable local store.
//!
//! [`LocalStore`] keeps every table in memory and makes each committed
//! transaction durable as one journal record before applying it. On open the
//! journal is replayed, so the tables survive process death at any point.

mod tables;
mod txn;

pub use tables::StoreOp;
pub use txn::StoreTxn;

use crate::action::PendingAction;
use crate::cache_entry::CacheEntry;
use crate::change_feed::{ChangeFeed, StoreEvent, SyncCounts};
use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::entity::{EntityKind, LocalEntity};
use crate::error::{CoreError, CoreResult};
use crate::id::{ActionId, EntityId, UploadId};
use crate::journal::{encode_record, Journal};
use crate::status::QueueStatus;
use crate::upload::{PendingUpload, UploadKind};
use fieldsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use tables::Tables;

/// Journal sizes around a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Journal size before compaction.
    pub bytes_before: u64,
    /// Journal size after compaction.
    pub bytes_after: u64,
}

/// The local persistent store: entities, queues, id map and cache metadata.
///
/// # Concurrency
///
/// Writers are serialized by the journal lock. Readers never block on the
/// journal and always observe either the state before or after a commit.
pub struct LocalStore {
    journal: Mutex<Journal>,
    tables: RwLock<Tables>,
    feed: ChangeFeed,
    sequence: AtomicU64,
    dir: Option<StoreDir>,
}

impl LocalStore {
    /// Opens a store in a directory, creating it if configured to.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreLocked`] if another process has the store
    /// open, or a journal error if replay fails.
    pub fn open(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        if dir.remove_stale_temp()? {
            tracing::warn!(path = %path.display(), "removed stale compaction file");
        }
        let backend = FileBackend::open(&dir.journal_path())?;
        let mut store = Self::open_with_backend(Box::new(backend), config.clone())?;
        store.dir = Some(dir);
        if config.wants_compaction(store.journal_size()?) {
            store.compact()?;
        }
        tracing::info!(path = %path.display(), "local store opened");
        Ok(store)
    }

    /// Opens an empty, non-persistent store.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(Box::new(InMemoryBackend::new()), StoreConfig::default())
    }

    /// Opens a store on an arbitrary journal backend.
    pub fn open_with_backend(
        backend: Box<dyn StorageBackend>,
        config: StoreConfig,
    ) -> CoreResult<Self> {
        let (journal, transactions) = Journal::open(backend, config.sync_on_commit)?;
        let tables = Tables::replay(transactions);

        let counts = tables.counts();
        tracing::debug!(
            entities = tables.entities.len(),
            pending_actions = counts.pending_actions,
            failed_actions = counts.failed_actions,
            pending_uploads = counts.pending_uploads,
            "local store recovered"
        );

        Ok(Self {
            journal: Mutex::new(journal),
            tables: RwLock::new(tables),
            feed: ChangeFeed::new(),
            sequence: AtomicU64::new(0),
            dir: None,
        })
    }

    /// Directory of a store opened with [`LocalStore::open`].
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// Runs `f` as one atomic transaction.
    ///
    /// If `f` returns `Ok`, everything it staged is journaled as one record
    /// and then applied. If `f` returns `Err`, nothing is written.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or a journal write error converted into
    /// `E`. A failed journal write leaves the tables untouched.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut StoreTxn<'_>) -> Result<T, E>,
        E: From<CoreError>,
    {
        let mut journal = self.journal.lock();

        let (value, ops) = {
            let tables = self.tables.read();
            let mut txn = StoreTxn::new(&tables);
            let value = f(&mut txn)?;
            (value, txn.into_ops())
        };

        if ops.is_empty() {
            return Ok(value);
        }

        journal.append(&ops).map_err(E::from)?;

        let counts = {
            let mut tables = self.tables.write();
            for op in ops {
                tables.apply(op);
            }
            tables.counts()
        };
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        drop(journal);

        self.feed.emit(StoreEvent::Committed { sequence, counts });
        Ok(value)
    }

    // Entities

    /// Reads an entity.
    #[must_use]
    pub fn get_entity(&self, kind: EntityKind, id: &EntityId) -> Option<LocalEntity> {
        self.tables.read().entities.get(&(kind, id.clone())).cloned()
    }

    /// Lists entities of one kind in id order.
    #[must_use]
    pub fn list_entities(&self, kind: EntityKind) -> Vec<LocalEntity> {
        self.tables
            .read()
            .entities
            .values()
            .filter(|entity| entity.kind == kind)
            .cloned()
            .collect()
    }

    // Queues

    /// Reads a pending action.
    #[must_use]
    pub fn get_action(&self, id: ActionId) -> Option<PendingAction> {
        self.tables.read().actions.get(&id).cloned()
    }

    /// Lists actions in queue order, optionally filtered by status.
    #[must_use]
    pub fn list_actions(&self, status: Option<QueueStatus>) -> Vec<PendingAction> {
        self.tables
            .read()
            .actions
            .values()
            .filter(|action| status.map_or(true, |s| action.status() == s))
            .cloned()
            .collect()
    }

    /// Reads a pending upload.
    #[must_use]
    pub fn get_upload(&self, id: UploadId) -> Option<PendingUpload> {
        self.tables.read().uploads.get(&id).cloned()
    }

    /// Lists uploads in id order, optionally filtered by kind and status.
    #[must_use]
    pub fn list_uploads(
        &self,
        kind: Option<UploadKind>,
        status: Option<QueueStatus>,
    ) -> Vec<PendingUpload> {
        self.tables
            .read()
            .uploads
            .values()
            .filter(|upload| kind.map_or(true, |k| upload.kind() == k))
            .filter(|upload| status.map_or(true, |s| upload.status() == s))
            .cloned()
            .collect()
    }

    /// Server id recorded for a placeholder.
    #[must_use]
    pub fn resolve_id(&self, local: &EntityId) -> Option<EntityId> {
        self.tables.read().id_map.get(local).cloned()
    }

    // Cache metadata

    /// Reads cache metadata for a file.
    #[must_use]
    pub fn get_cache_entry(&self, file_id: &str) -> Option<CacheEntry> {
        self.tables.read().cache.get(file_id).cloned()
    }

    /// Lists all cache entries ordered by file id.
    #[must_use]
    pub fn list_cache_entries(&self) -> Vec<CacheEntry> {
        self.tables.read().cache.values().cloned().collect()
    }

    // Observation

    /// Current queue sizes.
    #[must_use]
    pub fn counts(&self) -> SyncCounts {
        self.tables.read().counts()
    }

    /// Subscribes to commit events.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        self.feed.subscribe()
    }

    /// Current journal size in bytes.
    pub fn journal_size(&self) -> CoreResult<u64> {
        self.journal.lock().size()
    }

    // Maintenance

    /// Rewrites the journal as a single snapshot of the current state.
    ///
    /// Directory stores write a new file and atomically rename it into place;
    /// other backends are rewritten in place.
    pub fn compact(&self) -> CoreResult<CompactionStats> {
        let mut journal = self.journal.lock();
        let bytes_before = journal.size()?;
        let snapshot = self.tables.read().snapshot();

        match &self.dir {
            Some(dir) => {
                dir.replace_journal(&encode_record(&snapshot)?)?;
                let backend = FileBackend::open(&dir.journal_path())?;
                journal.replace_backend(Box::new(backend));
            }
            None => journal.rewrite(&snapshot)?,
        }

        let bytes_after = journal.size()?;
        tracing::info!(bytes_before, bytes_after, "journal compacted");
        Ok(CompactionStats {
            bytes_before,
            bytes_after,
        })
    }

    /// Flushes the journal to durable storage.
    pub fn flush(&self) -> CoreResult<()> {
        self.journal.lock().flush()
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.path())
            .field("counts", &self.counts())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{DailyLogUpdate, Mutation, NewDailyLog};
    use crate::upload::NewUpload;
    use serde_json::json;
    use tempfile::tempdir;

    fn draft() -> Mutation {
        Mutation::CreateDailyLog(NewDailyLog::new("prj_1", "2025-01-10"))
    }

    fn reopen(backend: &InMemoryBackend) -> LocalStore {
        LocalStore::open_with_backend(Box::new(backend.clone()), StoreConfig::default()).unwrap()
    }

    #[test]
    fn committed_transaction_is_visible() {
        let store = LocalStore::open_in_memory().unwrap();
        let local = EntityId::new_local();

        let action = store
            .transaction(|txn| {
                txn.put_entity(LocalEntity::optimistic(
                    EntityKind::DailyLog,
                    local.clone(),
                    json!({"date": "2025-01-10"}),
                    5,
                ));
                Ok::<_, CoreError>(txn.insert_action(local.clone(), draft(), 5))
            })
            .unwrap();

        assert_eq!(action.id, ActionId::new(1));
        assert!(store.get_entity(EntityKind::DailyLog, &local).is_some());
        assert_eq!(store.list_actions(None).len(), 1);
        assert_eq!(store.counts().pending_actions, 1);
    }

    #[test]
    fn failed_closure_writes_nothing() {
        let backend = InMemoryBackend::new();
        let store = reopen(&backend);

        let result: CoreResult<()> = store.transaction(|txn| {
            txn.insert_action(EntityId::new_local(), draft(), 0);
            Err(CoreError::invalid_operation("abort"))
        });

        assert!(result.is_err());
        assert!(store.list_actions(None).is_empty());
        assert!(backend.data().is_empty());
    }

    #[test]
    fn txn_reads_its_own_writes() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .transaction(|txn| {
                let action = txn.insert_action(EntityId::new_local(), draft(), 0);
                assert_eq!(txn.get_action(action.id), Some(action.clone()));
                assert_eq!(txn.list_actions().len(), 1);

                assert!(txn.delete_action(action.id));
                assert_eq!(txn.get_action(action.id), None);
                assert!(txn.list_actions().is_empty());

                txn.map_id(EntityId::from("local_a"), EntityId::server("srv_a"));
                assert_eq!(
                    txn.resolve_id(&EntityId::from("local_a")),
                    Some(EntityId::server("srv_a"))
                );
                Ok::<_, CoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn update_of_missing_action_fails() {
        let store = LocalStore::open_in_memory().unwrap();
        let ghost = PendingAction::new(ActionId::new(42), EntityId::new_local(), draft(), 0);

        let result = store.transaction(|txn| txn.update_action(ghost.clone()));
        assert!(matches!(result, Err(CoreError::ActionNotFound(id)) if id == ActionId::new(42)));
    }

    #[test]
    fn state_survives_reopen() {
        let backend = InMemoryBackend::new();
        let local = EntityId::new_local();
        {
            let store = reopen(&backend);
            store
                .transaction(|txn| {
                    txn.insert_action(local.clone(), draft(), 1);
                    txn.insert_upload(NewUpload::photo(local.clone(), "/tmp/a.jpg"), 1);
                    txn.map_id(EntityId::from("local_old"), EntityId::server("srv_old"));
                    Ok::<_, CoreError>(())
                })
                .unwrap();
        }

        let store = reopen(&backend);
        assert_eq!(store.list_actions(Some(QueueStatus::Pending)).len(), 1);
        assert_eq!(store.list_uploads(Some(UploadKind::Photo), None).len(), 1);
        assert_eq!(
            store.resolve_id(&EntityId::from("local_old")),
            Some(EntityId::server("srv_old"))
        );
    }

    #[test]
    fn ids_are_not_reused_after_compaction() {
        let backend = InMemoryBackend::new();
        {
            let store = reopen(&backend);
            let first = store
                .transaction(|txn| Ok::<_, CoreError>(txn.insert_action(EntityId::new_local(), draft(), 0)))
                .unwrap();
            store
                .transaction(|txn| Ok::<_, CoreError>(txn.delete_action(first.id)))
                .unwrap();
            store.compact().unwrap();
        }

        let store = reopen(&backend);
        let next = store
            .transaction(|txn| Ok::<_, CoreError>(txn.insert_action(EntityId::new_local(), draft(), 0)))
            .unwrap();
        assert_eq!(next.id, ActionId::new(2));
    }

    #[test]
    fn compaction_shrinks_journal_and_keeps_state() {
        let temp = tempdir().unwrap();
        let target = EntityId::server("srv_1");
        {
            let store = LocalStore::open(temp.path(), StoreConfig::default()).unwrap();
            store
                .transaction(|txn| {
                    txn.put_entity(LocalEntity::confirmed(
                        EntityKind::DailyLog,
                        target.clone(),
                        json!({"notes": "v0"}),
                        0,
                    ));
                    Ok::<_, CoreError>(())
                })
                .unwrap();
            for n in 1..=20 {
                store
                    .transaction(|txn| {
                        let update = DailyLogUpdate::new(target.clone()).with_notes(format!("v{n}"));
                        let action = txn.insert_action(target.clone(), Mutation::UpdateDailyLog(update), n);
                        txn.delete_action(action.id);
                        Ok::<_, CoreError>(())
                    })
                    .unwrap();
            }

            let stats = store.compact().unwrap();
            assert!(stats.bytes_after < stats.bytes_before);

            // Writes after compaction land in the new file.
            store
                .transaction(|txn| {
                    txn.map_id(EntityId::from("local_x"), EntityId::server("srv_x"));
                    Ok::<_, CoreError>(())
                })
                .unwrap();
        }

        let store = LocalStore::open(temp.path(), StoreConfig::default()).unwrap();
        assert!(store.get_entity(EntityKind::DailyLog, &target).is_some());
        assert!(store.list_actions(None).is_empty());
        assert_eq!(
            store.resolve_id(&EntityId::from("local_x")),
            Some(EntityId::server("srv_x"))
        );
    }

    #[test]
    fn oversized_journal_is_compacted_on_open() {
        let temp = tempdir().unwrap();
        let config = StoreConfig::new().compact_on_open(Some(256));
        let grown = {
            let store = LocalStore::open(temp.path(), config.clone()).unwrap();
            for n in 0..10 {
                store
                    .transaction(|txn| {
                        let action = txn.insert_action(EntityId::new_local(), draft(), n);
                        txn.delete_action(action.id);
                        Ok::<_, CoreError>(())
                    })
                    .unwrap();
            }
            store.journal_size().unwrap()
        };
        assert!(grown > 256);

        let store = LocalStore::open(temp.path(), config).unwrap();
        assert!(store.journal_size().unwrap() < grown);
        assert!(store.list_actions(None).is_empty());
    }

    #[test]
    fn second_open_of_directory_is_locked() {
        let temp = tempdir().unwrap();
        let _store = LocalStore::open(temp.path(), StoreConfig::default()).unwrap();
        let second = LocalStore::open(temp.path(), StoreConfig::default());
        assert!(matches!(second, Err(CoreError::StoreLocked)));
    }

    #[test]
    fn subscribers_see_counts_after_commit() {
        let store = LocalStore::open_in_memory().unwrap();
        let rx = store.subscribe();

        store
            .transaction(|txn| Ok::<_, CoreError>(txn.insert_action(EntityId::new_local(), draft(), 0)))
            .unwrap();

        match rx.try_recv().unwrap() {
            StoreEvent::Committed { sequence, counts } => {
                assert_eq!(sequence, 1);
                assert_eq!(counts.pending_actions, 1);
            }
        }
    }

    #[test]
    fn empty_transaction_emits_nothing() {
        let store = LocalStore::open_in_memory().unwrap();
        let rx = store.subscribe();
        store.transaction(|_| Ok::<_, CoreError>(())).unwrap();
        assert!(rx.try_recv().is_err());
    }
}
