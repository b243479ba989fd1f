//! Write transactions over the local store.

use super::tables::{StoreOp, Tables};
use crate::action::PendingAction;
use crate::cache_entry::CacheEntry;
use crate::clock::Timestamp;
use crate::entity::{EntityKind, LocalEntity};
use crate::error::{CoreError, CoreResult};
use crate::id::{ActionId, EntityId, UploadId};
use crate::mutation::Mutation;
use crate::upload::{NewUpload, PendingUpload};
use std::collections::BTreeMap;

/// A pending write transaction.
///
/// Reads see the committed state plus everything staged so far in this
/// transaction. Nothing is visible to other readers until
/// [`LocalStore::transaction`](super::LocalStore::transaction) commits it.
pub struct StoreTxn<'a> {
    base: &'a Tables,
    entities: BTreeMap<(EntityKind, EntityId), Option<LocalEntity>>,
    actions: BTreeMap<ActionId, Option<PendingAction>>,
    uploads: BTreeMap<UploadId, Option<PendingUpload>>,
    id_map: BTreeMap<EntityId, EntityId>,
    cache: BTreeMap<String, Option<CacheEntry>>,
    next_action: u64,
    next_upload: u64,
    ops: Vec<StoreOp>,
}

impl<'a> StoreTxn<'a> {
    pub(crate) fn new(base: &'a Tables) -> Self {
        Self {
            base,
            entities: BTreeMap::new(),
            actions: BTreeMap::new(),
            uploads: BTreeMap::new(),
            id_map: BTreeMap::new(),
            cache: BTreeMap::new(),
            next_action: base.next_action,
            next_upload: base.next_upload,
            ops: Vec::new(),
        }
    }

    pub(crate) fn into_ops(self) -> Vec<StoreOp> {
        self.ops
    }

    /// Returns true if nothing has been staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    // Entities

    /// Reads an entity.
    #[must_use]
    pub fn get_entity(&self, kind: EntityKind, id: &EntityId) -> Option<LocalEntity> {
        let key = (kind, id.clone());
        match self.entities.get(&key) {
            Some(staged) => staged.clone(),
            None => self.base.entities.get(&key).cloned(),
        }
    }

    /// Lists entities of one kind in id order.
    #[must_use]
    pub fn list_entities(&self, kind: EntityKind) -> Vec<LocalEntity> {
        merged(&self.base.entities, &self.entities)
            .into_iter()
            .filter(|entity| entity.kind == kind)
            .collect()
    }

    /// Inserts or replaces an entity.
    pub fn put_entity(&mut self, entity: LocalEntity) {
        self.entities
            .insert((entity.kind, entity.id.clone()), Some(entity.clone()));
        self.ops.push(StoreOp::PutEntity(entity));
    }

    /// Removes an entity. Returns true if it existed.
    pub fn delete_entity(&mut self, kind: EntityKind, id: &EntityId) -> bool {
        let existed = self.get_entity(kind, id).is_some();
        if existed {
            self.entities.insert((kind, id.clone()), None);
            self.ops.push(StoreOp::DeleteEntity {
                kind,
                id: id.clone(),
            });
        }
        existed
    }

    // Actions

    /// Reads a pending action.
    #[must_use]
    pub fn get_action(&self, id: ActionId) -> Option<PendingAction> {
        match self.actions.get(&id) {
            Some(staged) => staged.clone(),
            None => self.base.actions.get(&id).cloned(),
        }
    }

    /// Lists all pending actions in queue order.
    #[must_use]
    pub fn list_actions(&self) -> Vec<PendingAction> {
        merged(&self.base.actions, &self.actions)
    }

    /// Appends a new action to the queue with the next id.
    pub fn insert_action(
        &mut self,
        local_id: EntityId,
        mutation: Mutation,
        now: Timestamp,
    ) -> PendingAction {
        let id = ActionId::new(self.next_action);
        self.next_action += 1;
        let action = PendingAction::new(id, local_id, mutation, now);
        self.stage_action(action.clone());
        action
    }

    /// Replaces an existing action.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ActionNotFound`] if no such action exists.
    pub fn update_action(&mut self, action: PendingAction) -> CoreResult<()> {
        if self.get_action(action.id).is_none() {
            return Err(CoreError::ActionNotFound(action.id));
        }
        self.stage_action(action);
        Ok(())
    }

    /// Removes an action. Returns true if it existed.
    pub fn delete_action(&mut self, id: ActionId) -> bool {
        let existed = self.get_action(id).is_some();
        if existed {
            self.actions.insert(id, None);
            self.ops.push(StoreOp::DeleteAction(id));
        }
        existed
    }

    fn stage_action(&mut self, action: PendingAction) {
        self.actions.insert(action.id, Some(action.clone()));
        self.ops.push(StoreOp::PutAction(action));
    }

    // Uploads

    /// Reads a pending upload.
    #[must_use]
    pub fn get_upload(&self, id: UploadId) -> Option<PendingUpload> {
        match self.uploads.get(&id) {
            Some(staged) => staged.clone(),
            None => self.base.uploads.get(&id).cloned(),
        }
    }

    /// Lists all pending uploads in id order.
    #[must_use]
    pub fn list_uploads(&self) -> Vec<PendingUpload> {
        merged(&self.base.uploads, &self.uploads)
    }

    /// Appends a new upload with the next id.
    pub fn insert_upload(&mut self, upload: NewUpload, now: Timestamp) -> PendingUpload {
        let id = UploadId::new(self.next_upload);
        self.next_upload += 1;
        let pending = PendingUpload::new(id, upload, now);
        self.stage_upload(pending.clone());
        pending
    }

    /// Replaces an existing upload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UploadNotFound`] if no such upload exists.
    pub fn update_upload(&mut self, upload: PendingUpload) -> CoreResult<()> {
        if self.get_upload(upload.id).is_none() {
            return Err(CoreError::UploadNotFound(upload.id));
        }
        self.stage_upload(upload);
        Ok(())
    }

    /// Removes an upload. Returns true if it existed.
    pub fn delete_upload(&mut self, id: UploadId) -> bool {
        let existed = self.get_upload(id).is_some();
        if existed {
            self.uploads.insert(id, None);
            self.ops.push(StoreOp::DeleteUpload(id));
        }
        existed
    }

    fn stage_upload(&mut self, upload: PendingUpload) {
        self.uploads.insert(upload.id, Some(upload.clone()));
        self.ops.push(StoreOp::PutUpload(upload));
    }

    // Id map

    /// Server id recorded for a placeholder.
    #[must_use]
    pub fn resolve_id(&self, local: &EntityId) -> Option<EntityId> {
        self.id_map
            .get(local)
            .or_else(|| self.base.id_map.get(local))
            .cloned()
    }

    /// Records that `local` was replaced by `server`.
    pub fn map_id(&mut self, local: EntityId, server: EntityId) {
        self.id_map.insert(local.clone(), server.clone());
        self.ops.push(StoreOp::MapId { local, server });
    }

    // Cache metadata

    /// Reads cache metadata for a file.
    #[must_use]
    pub fn get_cache_entry(&self, file_id: &str) -> Option<CacheEntry> {
        match self.cache.get(file_id) {
            Some(staged) => staged.clone(),
            None => self.base.cache.get(file_id).cloned(),
        }
    }

    /// Lists all cache entries ordered by file id.
    #[must_use]
    pub fn list_cache_entries(&self) -> Vec<CacheEntry> {
        merged(&self.base.cache, &self.cache)
    }

    /// Inserts or replaces cache metadata.
    pub fn put_cache_entry(&mut self, entry: CacheEntry) {
        self.cache
            .insert(entry.file_id.clone(), Some(entry.clone()));
        self.ops.push(StoreOp::PutCacheEntry(entry));
    }

    /// Removes cache metadata. Returns true if it existed.
    pub fn delete_cache_entry(&mut self, file_id: &str) -> bool {
        let existed = self.get_cache_entry(file_id).is_some();
        if existed {
            self.cache.insert(file_id.to_string(), None);
            self.ops.push(StoreOp::DeleteCacheEntry(file_id.to_string()));
        }
        existed
    }
}

/// Committed rows with staged changes laid over them, in key order.
fn merged<K: Ord, V: Clone>(base: &BTreeMap<K, V>, staged: &BTreeMap<K, Option<V>>) -> Vec<V> {
    let mut view: BTreeMap<&K, &V> = base.iter().collect();
    for (key, value) in staged {
        match value {
            Some(value) => {
                view.insert(key, value);
            }
            None => {
                view.remove(key);
            }
        }
    }
    view.into_values().cloned().collect()
}
