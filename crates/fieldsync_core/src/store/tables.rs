//! In-memory tables and the operations that change them.

use crate::action::PendingAction;
use crate::cache_entry::CacheEntry;
use crate::change_feed::SyncCounts;
use crate::entity::{EntityKind, LocalEntity};
use crate::id::{ActionId, EntityId, UploadId};
use crate::status::QueueStatus;
use crate::upload::PendingUpload;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single change to the store, as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreOp {
    /// Insert or replace an entity.
    PutEntity(LocalEntity),
    /// Remove an entity.
    DeleteEntity {
        /// Entity type.
        kind: EntityKind,
        /// Entity id.
        id: EntityId,
    },
    /// Insert or replace a pending action.
    PutAction(PendingAction),
    /// Remove a pending action.
    DeleteAction(ActionId),
    /// Insert or replace a pending upload.
    PutUpload(PendingUpload),
    /// Remove a pending upload.
    DeleteUpload(UploadId),
    /// Record that a placeholder was replaced by a server id.
    MapId {
        /// Placeholder id.
        local: EntityId,
        /// Server-assigned id.
        server: EntityId,
    },
    /// Insert or replace cache metadata.
    PutCacheEntry(CacheEntry),
    /// Remove cache metadata.
    DeleteCacheEntry(String),
    /// Lowest ids the counters may hand out next.
    IdWatermark {
        /// Next action id.
        next_action: u64,
        /// Next upload id.
        next_upload: u64,
    },
}

/// Materialized store state.
#[derive(Debug, Clone)]
pub(crate) struct Tables {
    pub(crate) entities: BTreeMap<(EntityKind, EntityId), LocalEntity>,
    pub(crate) actions: BTreeMap<ActionId, PendingAction>,
    pub(crate) uploads: BTreeMap<UploadId, PendingUpload>,
    pub(crate) id_map: BTreeMap<EntityId, EntityId>,
    pub(crate) cache: BTreeMap<String, CacheEntry>,
    pub(crate) next_action: u64,
    pub(crate) next_upload: u64,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            entities: BTreeMap::new(),
            actions: BTreeMap::new(),
            uploads: BTreeMap::new(),
            id_map: BTreeMap::new(),
            cache: BTreeMap::new(),
            next_action: 1,
            next_upload: 1,
        }
    }
}

impl Tables {
    /// Applies one operation.
    pub(crate) fn apply(&mut self, op: StoreOp) {
        match op {
            StoreOp::PutEntity(entity) => {
                self.entities.insert((entity.kind, entity.id.clone()), entity);
            }
            StoreOp::DeleteEntity { kind, id } => {
                self.entities.remove(&(kind, id));
            }
            StoreOp::PutAction(action) => {
                self.next_action = self.next_action.max(action.id.as_u64() + 1);
                self.actions.insert(action.id, action);
            }
            StoreOp::DeleteAction(id) => {
                self.actions.remove(&id);
            }
            StoreOp::PutUpload(upload) => {
                self.next_upload = self.next_upload.max(upload.id.as_u64() + 1);
                self.uploads.insert(upload.id, upload);
            }
            StoreOp::DeleteUpload(id) => {
                self.uploads.remove(&id);
            }
            StoreOp::MapId { local, server } => {
                self.id_map.insert(local, server);
            }
            StoreOp::PutCacheEntry(entry) => {
                self.cache.insert(entry.file_id.clone(), entry);
            }
            StoreOp::DeleteCacheEntry(file_id) => {
                self.cache.remove(&file_id);
            }
            StoreOp::IdWatermark {
                next_action,
                next_upload,
            } => {
                self.next_action = self.next_action.max(next_action);
                self.next_upload = self.next_upload.max(next_upload);
            }
        }
    }

    /// Rebuilds tables from replayed journal transactions.
    pub(crate) fn replay(transactions: Vec<Vec<StoreOp>>) -> Self {
        let mut tables = Self::default();
        for op in transactions.into_iter().flatten() {
            tables.apply(op);
        }
        tables
    }

    /// Operations that rebuild the current state from scratch.
    pub(crate) fn snapshot(&self) -> Vec<StoreOp> {
        let mut ops = Vec::with_capacity(
            self.entities.len()
                + self.actions.len()
                + self.uploads.len()
                + self.id_map.len()
                + self.cache.len()
                + 1,
        );
        ops.extend(self.entities.values().cloned().map(StoreOp::PutEntity));
        ops.extend(self.actions.values().cloned().map(StoreOp::PutAction));
        ops.extend(self.uploads.values().cloned().map(StoreOp::PutUpload));
        ops.extend(self.id_map.iter().map(|(local, server)| StoreOp::MapId {
            local: local.clone(),
            server: server.clone(),
        }));
        ops.extend(self.cache.values().cloned().map(StoreOp::PutCacheEntry));
        ops.push(StoreOp::IdWatermark {
            next_action: self.next_action,
            next_upload: self.next_upload,
        });
        ops
    }

    pub(crate) fn counts(&self) -> SyncCounts {
        let mut counts = SyncCounts::default();
        for action in self.actions.values() {
            match action.status() {
                QueueStatus::Pending => counts.pending_actions += 1,
                QueueStatus::Failed => counts.failed_actions += 1,
            }
        }
        for upload in self.uploads.values() {
            match upload.status() {
                QueueStatus::Pending => counts.pending_uploads += 1,
                QueueStatus::Failed => counts.failed_uploads += 1,
            }
        }
        counts
    }
}
