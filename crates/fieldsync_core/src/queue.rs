//! Durable FIFO queues of pending actions and pending uploads.
//!
//! Queues only touch the local store; they never call the server. Entries are
//! replayed in id order, which is insertion order.

use crate::action::PendingAction;
use crate::clock::Timestamp;
use crate::error::{CoreError, CoreResult};
use crate::id::{ActionId, EntityId, UploadId};
use crate::mutation::Mutation;
use crate::status::QueueStatus;
use crate::store::{LocalStore, StoreTxn};
use crate::upload::{NewUpload, PendingUpload, UploadKind};

/// Manual resolution of a failed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Delete the entry.
    Discard,
    /// Put the entry back in the queue with a fresh retry budget.
    RetryNow,
}

/// Queue of pending mutations.
#[derive(Debug, Clone, Copy)]
pub struct ActionQueue<'a> {
    store: &'a LocalStore,
}

impl<'a> ActionQueue<'a> {
    /// Creates a queue view over `store`.
    #[must_use]
    pub fn new(store: &'a LocalStore) -> Self {
        Self { store }
    }

    /// Appends a mutation inside the caller's transaction.
    ///
    /// Committing together with the optimistic entity write means neither can
    /// exist without the other.
    pub fn enqueue(
        &self,
        txn: &mut StoreTxn<'_>,
        local_id: EntityId,
        mutation: Mutation,
        now: Timestamp,
    ) -> ActionId {
        let action = txn.insert_action(local_id, mutation, now);
        tracing::debug!(action_id = %action.id, mutation = action.mutation.name(), "action enqueued");
        action.id
    }

    /// All pending actions in FIFO order.
    #[must_use]
    pub fn dequeue_eligible(&self) -> Vec<PendingAction> {
        self.store.list_actions(Some(QueueStatus::Pending))
    }

    /// Records a failed replay attempt and returns the resulting status.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ActionNotFound`] for an unknown id.
    pub fn record_failure(
        &self,
        id: ActionId,
        error: &str,
        max_retry: u32,
        retryable: bool,
        now: Timestamp,
    ) -> CoreResult<QueueStatus> {
        self.store.transaction(|txn| -> CoreResult<_> {
            let mut action = txn.get_action(id).ok_or(CoreError::ActionNotFound(id))?;
            let status = action.state.record_failure(now, error, max_retry, retryable);
            txn.update_action(action)?;
            Ok(status)
        })
    }

    /// Deletes a replayed action inside the reconciliation transaction.
    ///
    /// Returns false if the action was already gone.
    pub fn record_success(&self, txn: &mut StoreTxn<'_>, id: ActionId) -> bool {
        txn.delete_action(id)
    }

    /// Actions needing manual resolution, oldest first.
    #[must_use]
    pub fn failed(&self) -> Vec<PendingAction> {
        self.store.list_actions(Some(QueueStatus::Failed))
    }

    /// Applies a manual resolution to a failed action.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ActionNotFound`] for an unknown id and
    /// [`CoreError::InvalidOperation`] if the action is not failed.
    pub fn resolve_failed(&self, id: ActionId, resolution: Resolution) -> CoreResult<()> {
        self.store.transaction(|txn| -> CoreResult<_> {
            let mut action = txn.get_action(id).ok_or(CoreError::ActionNotFound(id))?;
            if action.status() != QueueStatus::Failed {
                return Err(CoreError::invalid_operation(format!(
                    "action {id} is not failed"
                )));
            }
            match resolution {
                Resolution::Discard => {
                    txn.delete_action(id);
                }
                Resolution::RetryNow => {
                    action.state.reset();
                    txn.update_action(action)?;
                }
            }
            Ok(())
        })?;
        tracing::info!(action_id = %id, ?resolution, "failed action resolved");
        Ok(())
    }
}

/// Queues of pending photo and file uploads.
#[derive(Debug, Clone, Copy)]
pub struct UploadQueue<'a> {
    store: &'a LocalStore,
}

impl<'a> UploadQueue<'a> {
    /// Creates a queue view over `store`.
    #[must_use]
    pub fn new(store: &'a LocalStore) -> Self {
        Self { store }
    }

    /// Appends an upload inside the caller's transaction.
    pub fn enqueue(&self, txn: &mut StoreTxn<'_>, upload: NewUpload, now: Timestamp) -> UploadId {
        let pending = txn.insert_upload(upload, now);
        tracing::debug!(upload_id = %pending.id, kind = %pending.kind(), "upload enqueued");
        pending.id
    }

    /// Pending uploads of one kind in FIFO order.
    ///
    /// Includes uploads whose parent is still a placeholder; the engine skips
    /// those without consuming a retry.
    #[must_use]
    pub fn eligible(&self, kind: UploadKind) -> Vec<PendingUpload> {
        self.store
            .list_uploads(Some(kind), Some(QueueStatus::Pending))
    }

    /// Records a failed upload attempt and returns the resulting status.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UploadNotFound`] for an unknown id.
    pub fn record_failure(
        &self,
        id: UploadId,
        error: &str,
        max_retry: u32,
        retryable: bool,
        now: Timestamp,
    ) -> CoreResult<QueueStatus> {
        self.store.transaction(|txn| -> CoreResult<_> {
            let mut upload = txn.get_upload(id).ok_or(CoreError::UploadNotFound(id))?;
            let status = upload.state.record_failure(now, error, max_retry, retryable);
            txn.update_upload(upload)?;
            Ok(status)
        })
    }

    /// Marks an upload failed without consuming a retry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UploadNotFound`] for an unknown id.
    pub fn fail_now(&self, id: UploadId, error: &str, now: Timestamp) -> CoreResult<()> {
        self.store.transaction(|txn| -> CoreResult<_> {
            let mut upload = txn.get_upload(id).ok_or(CoreError::UploadNotFound(id))?;
            upload.state.fail_now(now, error);
            txn.update_upload(upload)
        })
    }

    /// Deletes an uploaded entry. Returns false if it was already gone.
    pub fn record_success(&self, txn: &mut StoreTxn<'_>, id: UploadId) -> bool {
        txn.delete_upload(id)
    }

    /// Points every queued upload attached to `from` at `to`.
    ///
    /// Returns the number of uploads rewritten.
    pub fn rewrite_parent(&self, txn: &mut StoreTxn<'_>, from: &EntityId, to: &EntityId) -> usize {
        let mut rewritten = 0;
        for mut upload in txn.list_uploads() {
            if upload.upload.parent_id != *from {
                continue;
            }
            upload.upload.parent_id = to.clone();
            // Listed from this transaction, so the upload exists.
            if txn.update_upload(upload).is_ok() {
                rewritten += 1;
            }
        }
        rewritten
    }

    /// Uploads needing manual resolution, oldest first.
    #[must_use]
    pub fn failed(&self) -> Vec<PendingUpload> {
        self.store.list_uploads(None, Some(QueueStatus::Failed))
    }

    /// Applies a manual resolution to a failed upload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UploadNotFound`] for an unknown id and
    /// [`CoreError::InvalidOperation`] if the upload is not failed.
    pub fn resolve_failed(&self, id: UploadId, resolution: Resolution) -> CoreResult<()> {
        self.store.transaction(|txn| -> CoreResult<_> {
            let mut upload = txn.get_upload(id).ok_or(CoreError::UploadNotFound(id))?;
            if upload.status() != QueueStatus::Failed {
                return Err(CoreError::invalid_operation(format!(
                    "upload {id} is not failed"
                )));
            }
            match resolution {
                Resolution::Discard => {
                    txn.delete_upload(id);
                }
                Resolution::RetryNow => {
                    upload.state.reset();
                    txn.update_upload(upload)?;
                }
            }
            Ok(())
        })?;
        tracing::info!(upload_id = %id, ?resolution, "failed upload resolved");
        Ok(())
    }
}

impl LocalStore {
    /// Pending action queue over this store.
    #[must_use]
    pub fn actions(&self) -> ActionQueue<'_> {
        ActionQueue::new(self)
    }

    /// Pending upload queues over this store.
    #[must_use]
    pub fn uploads(&self) -> UploadQueue<'_> {
        UploadQueue::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{DailyLogUpdate, NewDailyLog};

    fn store() -> LocalStore {
        LocalStore::open_in_memory().unwrap()
    }

    fn enqueue_create(store: &LocalStore) -> ActionId {
        store
            .transaction(|txn| {
                Ok::<_, CoreError>(store.actions().enqueue(
                    txn,
                    EntityId::new_local(),
                    Mutation::CreateDailyLog(NewDailyLog::new("prj_1", "2025-01-10")),
                    0,
                ))
            })
            .unwrap()
    }

    #[test]
    fn dequeue_is_fifo_and_skips_failed() {
        let store = store();
        let a = enqueue_create(&store);
        let b = enqueue_create(&store);
        let c = enqueue_create(&store);

        store.actions().record_failure(b, "422", 5, false, 1).unwrap();

        let ids: Vec<_> = store
            .actions()
            .dequeue_eligible()
            .into_iter()
            .map(|action| action.id)
            .collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[test]
    fn retry_budget_of_three() {
        let store = store();
        let id = enqueue_create(&store);
        let queue = store.actions();

        assert_eq!(queue.record_failure(id, "503", 3, true, 1).unwrap(), QueueStatus::Pending);
        assert_eq!(queue.record_failure(id, "503", 3, true, 2).unwrap(), QueueStatus::Pending);
        assert_eq!(queue.record_failure(id, "503", 3, true, 3).unwrap(), QueueStatus::Failed);

        let failed = queue.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count(), 3);
        assert_eq!(failed[0].last_error(), Some("503"));
        assert!(queue.dequeue_eligible().is_empty());
    }

    #[test]
    fn client_error_fails_after_one_attempt() {
        let store = store();
        let id = enqueue_create(&store);

        let status = store.actions().record_failure(id, "422", 5, false, 1).unwrap();
        assert_eq!(status, QueueStatus::Failed);
        assert_eq!(store.get_action(id).unwrap().retry_count(), 1);
    }

    #[test]
    fn resolve_retry_resets_budget() {
        let store = store();
        let id = enqueue_create(&store);
        let queue = store.actions();
        queue.record_failure(id, "422", 5, false, 1).unwrap();

        queue.resolve_failed(id, Resolution::RetryNow).unwrap();

        let action = store.get_action(id).unwrap();
        assert_eq!(action.status(), QueueStatus::Pending);
        assert_eq!(action.retry_count(), 0);
        assert_eq!(action.last_error(), None);
    }

    #[test]
    fn resolve_discard_deletes() {
        let store = store();
        let id = enqueue_create(&store);
        store.actions().record_failure(id, "422", 5, false, 1).unwrap();

        store.actions().resolve_failed(id, Resolution::Discard).unwrap();
        assert!(store.get_action(id).is_none());
    }

    #[test]
    fn resolve_rejects_pending_and_unknown() {
        let store = store();
        let id = enqueue_create(&store);

        let pending = store.actions().resolve_failed(id, Resolution::Discard);
        assert!(matches!(pending, Err(CoreError::InvalidOperation { .. })));

        let unknown = store.actions().resolve_failed(ActionId::new(99), Resolution::Discard);
        assert!(matches!(unknown, Err(CoreError::ActionNotFound(_))));
    }

    #[test]
    fn record_success_deletes_inside_transaction() {
        let store = store();
        let id = enqueue_create(&store);

        let existed = store
            .transaction(|txn| Ok::<_, CoreError>(store.actions().record_success(txn, id)))
            .unwrap();
        assert!(existed);
        assert!(store.get_action(id).is_none());
    }

    #[test]
    fn upload_eligibility_is_per_kind() {
        let store = store();
        let (photo, file) = store
            .transaction(|txn| {
                let uploads = store.uploads();
                let photo = uploads.enqueue(txn, NewUpload::photo("srv_1", "/tmp/a.jpg"), 0);
                let file = uploads.enqueue(txn, NewUpload::file("srv_1", "/tmp/b.pdf"), 0);
                Ok::<_, CoreError>((photo, file))
            })
            .unwrap();

        let photos = store.uploads().eligible(UploadKind::Photo);
        let files = store.uploads().eligible(UploadKind::File);
        assert_eq!(photos.iter().map(|u| u.id).collect::<Vec<_>>(), vec![photo]);
        assert_eq!(files.iter().map(|u| u.id).collect::<Vec<_>>(), vec![file]);
    }

    #[test]
    fn fail_now_does_not_consume_retry() {
        let store = store();
        let id = store
            .transaction(|txn| {
                Ok::<_, CoreError>(store.uploads().enqueue(txn, NewUpload::photo("srv_1", "/gone.jpg"), 0))
            })
            .unwrap();

        store.uploads().fail_now(id, "missing file: /gone.jpg", 4).unwrap();

        let upload = store.get_upload(id).unwrap();
        assert_eq!(upload.status(), QueueStatus::Failed);
        assert_eq!(upload.state.retry_count, 0);
        assert_eq!(store.uploads().failed().len(), 1);
    }

    #[test]
    fn rewrite_parent_moves_only_matching_uploads() {
        let store = store();
        let placeholder = EntityId::new_local();
        store
            .transaction(|txn| {
                let uploads = store.uploads();
                uploads.enqueue(txn, NewUpload::photo(placeholder.clone(), "/a.jpg"), 0);
                uploads.enqueue(txn, NewUpload::photo(placeholder.clone(), "/b.jpg"), 0);
                uploads.enqueue(txn, NewUpload::photo("srv_other", "/c.jpg"), 0);
                Ok::<_, CoreError>(())
            })
            .unwrap();

        let rewritten = store
            .transaction(|txn| {
                Ok::<_, CoreError>(store.uploads().rewrite_parent(
                    txn,
                    &placeholder,
                    &EntityId::server("srv_123"),
                ))
            })
            .unwrap();

        assert_eq!(rewritten, 2);
        let parents: Vec<_> = store
            .list_uploads(None, None)
            .into_iter()
            .map(|u| u.upload.parent_id)
            .collect();
        assert_eq!(
            parents,
            vec![
                EntityId::server("srv_123"),
                EntityId::server("srv_123"),
                EntityId::server("srv_other")
            ]
        );
    }

    #[test]
    fn update_targets_survive_in_queue() {
        let store = store();
        let id = store
            .transaction(|txn| {
                Ok::<_, CoreError>(store.actions().enqueue(
                    txn,
                    EntityId::server("srv_9"),
                    Mutation::UpdateDailyLog(DailyLogUpdate::new("srv_9").with_notes("x")),
                    0,
                ))
            })
            .unwrap();
        let action = store.get_action(id).unwrap();
        assert_eq!(action.mutation.target(), Some(&EntityId::server("srv_9")));
    }
}
