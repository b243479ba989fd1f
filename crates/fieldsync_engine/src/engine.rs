//! The sync engine: optimistic writes in, queued replay out.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteApi, ServerEntity, UploadPayload};
use fieldsync_core::{
    ActionClass, ActionId, Clock, EntityId, EntityKind, LocalEntity, LocalStore, Mutation, NewUpload,
    PendingAction, PendingUpload, QueueStatus, Resolution, StoreEvent, StoreTxn, SyncCounts, SystemClock,
    Timestamp, UploadId, UploadKind,
};
use parking_lot::{Mutex, RwLock};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Counters for one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Remote calls made.
    pub attempted: usize,
    /// Entries replayed and reconciled.
    pub succeeded: usize,
    /// Entries that became `Failed` this pass.
    pub failed: usize,
    /// Entries left `Pending` after a retryable failure.
    pub retrying: usize,
    /// Entries not attempted: waiting on a parent, or behind a halt.
    pub skipped: usize,
    /// Wall time of the pass.
    pub duration: Duration,
}

/// Result of a sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing failed and nothing is waiting for a retry.
    Success(PassReport),
    /// At least one entry hit a retryable failure and is still pending.
    RetryScheduled(PassReport),
    /// Entries became terminally failed this pass; none need a retry.
    PartialFailure {
        /// Entries that became `Failed`.
        failed: usize,
        /// Pass counters.
        report: PassReport,
    },
}

impl SyncOutcome {
    fn from_report(report: PassReport) -> Self {
        if report.retrying > 0 {
            SyncOutcome::RetryScheduled(report)
        } else if report.failed > 0 {
            SyncOutcome::PartialFailure {
                failed: report.failed,
                report,
            }
        } else {
            SyncOutcome::Success(report)
        }
    }

    /// Counters of the pass.
    #[must_use]
    pub fn report(&self) -> &PassReport {
        match self {
            SyncOutcome::Success(report) | SyncOutcome::RetryScheduled(report) => report,
            SyncOutcome::PartialFailure { report, .. } => report,
        }
    }

    /// Returns true for [`SyncOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success(_))
    }

    /// Returns true if another pass should follow after a backoff.
    #[must_use]
    pub fn needs_retry(&self) -> bool {
        matches!(self, SyncOutcome::RetryScheduled(_))
    }
}

/// Statistics about sync passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes completed (including ones that returned an error).
    pub passes: u64,
    /// Actions replayed and reconciled.
    pub actions_synced: u64,
    /// Uploads completed.
    pub uploads_synced: u64,
    /// Failed replay attempts.
    pub failures: u64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// When the last pass finished.
    pub last_pass_at: Option<Timestamp>,
}

/// Cancels the pass in progress of the engine it came from.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Requests cancellation. Takes effect before the next queue entry of the
    /// running pass, or at the start of the next pass.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

enum ItemResult {
    Synced,
    Failed,
    Retrying,
    Skipped,
}

/// Replays the pending queues against the remote API.
///
/// One pass drains pending actions in FIFO order, then photo uploads, then
/// file uploads. Each successful remote call is reconciled in a single local
/// transaction that also removes the queue entry, so a crash at any point
/// leaves every entry either untouched or fully applied.
pub struct SyncEngine<R: RemoteApi, C: Clock = SystemClock> {
    store: Arc<LocalStore>,
    remote: Arc<R>,
    clock: C,
    config: SyncConfig,
    stats: RwLock<SyncStats>,
    cancelled: Arc<AtomicBool>,
    pass_lock: Mutex<()>,
}

impl<R: RemoteApi> SyncEngine<R, SystemClock> {
    /// Creates an engine reading the system clock.
    pub fn new(store: Arc<LocalStore>, remote: Arc<R>, config: SyncConfig) -> Self {
        Self::with_clock(store, remote, SystemClock, config)
    }
}

impl<R: RemoteApi, C: Clock> SyncEngine<R, C> {
    /// Creates an engine with an explicit clock.
    pub fn with_clock(store: Arc<LocalStore>, remote: Arc<R>, clock: C, config: SyncConfig) -> Self {
        Self {
            store,
            remote,
            clock,
            config,
            stats: RwLock::new(SyncStats::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
            pass_lock: Mutex::new(()),
        }
    }

    /// The local store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// The remote API.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Current queue counts.
    pub fn counts(&self) -> SyncCounts {
        self.store.counts()
    }

    /// Subscribes to store commits (queue count changes).
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        self.store.subscribe()
    }

    /// Cancels the pass in progress, or the next pass if none is running.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// A handle that can cancel passes from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    // Mutation entry points

    /// Applies a mutation optimistically and queues it for replay.
    ///
    /// The optimistic entity write and the queue entry commit in one
    /// transaction. Returns the id the UI should use for the entity: a fresh
    /// placeholder for creates, the (resolved) target for updates.
    ///
    /// # Errors
    ///
    /// Only local store failures.
    pub fn enqueue_mutation(&self, mut mutation: Mutation) -> SyncResult<EntityId> {
        let now = self.clock.now();
        let store = &self.store;

        let (id, class) = store.transaction(|txn| -> SyncResult<_> {
            mutation.resolve_ids(|id| txn.resolve_id(id));
            let class = mutation.class();

            let local_id = match class {
                ActionClass::Create => {
                    let local_id = EntityId::new_local();
                    if let Some(body) = mutation.optimistic_body() {
                        txn.put_entity(LocalEntity::optimistic(
                            mutation.entity_kind(),
                            local_id.clone(),
                            body,
                            now,
                        ));
                    }
                    local_id
                }
                ActionClass::Update => {
                    let target = mutation
                        .target()
                        .cloned()
                        .ok_or_else(|| SyncError::precondition("update without target"))?;
                    if let Some(mut entity) = txn.get_entity(mutation.entity_kind(), &target) {
                        mutation.apply_patch(&mut entity.body);
                        entity.pending_sync = true;
                        entity.updated_at = now;
                        txn.put_entity(entity);
                    }
                    target
                }
                ActionClass::CreateSubResource => EntityId::new_local(),
            };

            store.actions().enqueue(txn, local_id.clone(), mutation, now);
            Ok((local_id, class))
        })?;

        debug!(entity_id = %id, ?class, "mutation applied optimistically");
        Ok(id)
    }

    /// Queues a photo or file upload.
    ///
    /// A placeholder parent that has already been reconciled is stored as
    /// its server id.
    ///
    /// # Errors
    ///
    /// Only local store failures.
    pub fn enqueue_upload(&self, mut upload: NewUpload) -> SyncResult<UploadId> {
        let now = self.clock.now();
        let store = &self.store;
        store.transaction(|txn| -> SyncResult<_> {
            if let Some(server_id) = txn.resolve_id(&upload.parent_id) {
                upload.parent_id = server_id;
            }
            Ok(store.uploads().enqueue(txn, upload, now))
        })
    }

    // Sync passes

    /// Runs one sync pass now.
    ///
    /// # Errors
    ///
    /// Returns an error only if the local store fails or the pass is
    /// cancelled; remote failures are recorded on queue entries and reflected
    /// in the outcome.
    pub fn trigger_sync(&self) -> SyncResult<SyncOutcome> {
        self.run_pass()
    }

    /// Runs one sync pass over a snapshot of the queues.
    ///
    /// Entries enqueued while the pass runs wait for the next pass. Only one
    /// pass runs at a time; concurrent callers wait.
    ///
    /// # Errors
    ///
    /// See [`SyncEngine::trigger_sync`].
    pub fn run_pass(&self) -> SyncResult<SyncOutcome> {
        let _pass = self.pass_lock.lock();
        let result = self.run_locked_pass();
        // A cancel is consumed by the pass it reached, never by the next one.
        self.cancelled.store(false, Ordering::SeqCst);
        result
    }

    fn run_locked_pass(&self) -> SyncResult<SyncOutcome> {
        let start = Instant::now();
        let actions = self.store.actions().dequeue_eligible();
        let uploads: Vec<PendingUpload> = UploadKind::ALL
            .iter()
            .flat_map(|kind| self.store.uploads().eligible(*kind))
            .collect();

        let mut report = PassReport::default();
        if actions.is_empty() && uploads.is_empty() {
            self.finish_pass(None);
            return Ok(SyncOutcome::Success(report));
        }

        info!(
            actions = actions.len(),
            uploads = uploads.len(),
            "sync pass started"
        );

        let result = self
            .replay_actions(&actions, &mut report)
            .and_then(|()| self.replay_uploads(&uploads, &mut report));
        report.duration = start.elapsed();

        if let Err(e) = result {
            warn!(error = %e, "sync pass aborted");
            self.finish_pass(Some(e.to_string()));
            return Err(e);
        }
        self.finish_pass(None);

        let outcome = SyncOutcome::from_report(report);
        let report = outcome.report();
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            retrying = report.retrying,
            skipped = report.skipped,
            duration_ms = report.duration.as_millis() as u64,
            "sync pass finished"
        );
        Ok(outcome)
    }

    fn finish_pass(&self, error: Option<String>) {
        let mut stats = self.stats.write();
        stats.passes += 1;
        stats.last_pass_at = Some(self.clock.now());
        if error.is_some() {
            stats.last_error = error;
        }
    }

    fn replay_actions(&self, actions: &[PendingAction], report: &mut PassReport) -> SyncResult<()> {
        for (index, snapshot) in actions.iter().enumerate() {
            self.check_cancelled()?;

            // Resolved or reconciled since the snapshot.
            let Some(action) = self
                .store
                .get_action(snapshot.id)
                .filter(|action| action.state.is_pending())
            else {
                continue;
            };

            match self.replay_action(action, report)? {
                ItemResult::Synced => report.succeeded += 1,
                ItemResult::Failed => report.failed += 1,
                ItemResult::Skipped => report.skipped += 1,
                ItemResult::Retrying => {
                    report.retrying += 1;
                    if self.config.halt_on_retryable {
                        let remaining = actions.len() - index - 1;
                        report.skipped += remaining;
                        info!(remaining, "action phase halted until next pass");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn replay_action(&self, action: PendingAction, report: &mut PassReport) -> SyncResult<ItemResult> {
        let mut mutation = action.mutation.clone();
        mutation.resolve_ids(|id| self.store.resolve_id(id));

        if let Some(unresolved) = mutation.references().into_iter().find(|id| id.is_local()) {
            if self.create_queued_for(unresolved) {
                debug!(action_id = %action.id, reference = %unresolved, "waiting on queued create");
                return Ok(ItemResult::Skipped);
            }
            let error = SyncError::precondition(format!("unresolved reference {unresolved}"));
            return self.record_action_failure(&action, &error);
        }

        report.attempted += 1;
        let result = match &mutation {
            Mutation::CreateDailyLog(draft) => self.remote.create_daily_log(draft),
            Mutation::UpdateDailyLog(update) => self.remote.update_daily_log(update),
            Mutation::CreateAnnotation(annotation) => self.remote.create_annotation(annotation),
        };

        match result {
            Ok(server) => {
                let replayed = PendingAction { mutation, ..action };
                self.apply_reconciliation(&replayed, &server)?;
                self.stats.write().actions_synced += 1;
                Ok(ItemResult::Synced)
            }
            Err(e) if e.aborts_pass() => Err(e),
            Err(e) => self.record_action_failure(&action, &e),
        }
    }

    fn create_queued_for(&self, placeholder: &EntityId) -> bool {
        self.store.list_actions(None).iter().any(|action| {
            action.mutation.class() == ActionClass::Create && action.local_id == *placeholder
        })
    }

    fn record_action_failure(&self, action: &PendingAction, error: &SyncError) -> SyncResult<ItemResult> {
        let status = self.store.actions().record_failure(
            action.id,
            &error.to_string(),
            self.config.max_retry,
            error.is_retryable(),
            self.clock.now(),
        )?;
        warn!(
            action_id = %action.id,
            mutation = action.mutation.name(),
            class = ?error.classify(),
            %status,
            error = %error,
            "action replay failed"
        );
        self.note_failure(error);
        Ok(match status {
            QueueStatus::Pending => ItemResult::Retrying,
            QueueStatus::Failed => ItemResult::Failed,
        })
    }

    /// Applies a server response to the local store and dequeues the action.
    ///
    /// Runs as one transaction. Re-applying the same response is a no-op
    /// apart from refreshing the confirmed entity.
    ///
    /// # Errors
    ///
    /// Only local store failures.
    pub fn apply_reconciliation(&self, action: &PendingAction, server: &ServerEntity) -> SyncResult<()> {
        let now = self.clock.now();
        let store = &self.store;
        let kind = action.mutation.entity_kind();

        store.transaction(|txn| -> SyncResult<_> {
            match action.mutation.class() {
                ActionClass::Create => {
                    let placeholder = &action.local_id;
                    txn.delete_entity(kind, placeholder);
                    if placeholder.is_local() && *placeholder != server.id {
                        txn.map_id(placeholder.clone(), server.id.clone());
                        let moved = store.uploads().rewrite_parent(txn, placeholder, &server.id);
                        debug!(%placeholder, server_id = %server.id, uploads = moved, "placeholder reconciled");
                    }
                    let entity = reconciled_entity(txn, action, kind, server.id.clone(), server, now);
                    txn.put_entity(entity);
                }
                ActionClass::Update => {
                    let target = action
                        .mutation
                        .target()
                        .map(|id| txn.resolve_id(id).unwrap_or_else(|| id.clone()))
                        .unwrap_or_else(|| server.id.clone());
                    let entity = reconciled_entity(txn, action, kind, target, server, now);
                    txn.put_entity(entity);
                }
                ActionClass::CreateSubResource => {}
            }
            store.actions().record_success(txn, action.id);
            Ok(())
        })
    }

    fn replay_uploads(&self, uploads: &[PendingUpload], report: &mut PassReport) -> SyncResult<()> {
        for snapshot in uploads {
            self.check_cancelled()?;

            let Some(upload) = self
                .store
                .get_upload(snapshot.id)
                .filter(|upload| upload.state.is_pending())
            else {
                continue;
            };

            match self.replay_upload(upload, report)? {
                ItemResult::Synced => report.succeeded += 1,
                ItemResult::Failed => report.failed += 1,
                ItemResult::Retrying => report.retrying += 1,
                ItemResult::Skipped => report.skipped += 1,
            }
        }
        Ok(())
    }

    fn replay_upload(&self, upload: PendingUpload, report: &mut PassReport) -> SyncResult<ItemResult> {
        let parent_id = if upload.waits_on_parent() {
            match self.store.resolve_id(upload.parent_id()) {
                Some(server_id) => server_id,
                None => {
                    debug!(upload_id = %upload.id, parent = %upload.parent_id(), "parent not synced yet");
                    return Ok(ItemResult::Skipped);
                }
            }
        } else {
            upload.parent_id().clone()
        };

        let path = &upload.upload.local_path;
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) => {
                let error = if e.kind() == io::ErrorKind::NotFound {
                    SyncError::MissingFile { path: path.clone() }
                } else {
                    SyncError::precondition(format!("cannot read {}: {e}", path.display()))
                };
                self.store
                    .uploads()
                    .fail_now(upload.id, &error.to_string(), self.clock.now())?;
                warn!(upload_id = %upload.id, error = %error, "upload failed locally");
                self.note_failure(&error);
                return Ok(ItemResult::Failed);
            }
        };

        let payload = UploadPayload {
            parent_id,
            file_name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("upload-{}", upload.id)),
            content,
            category: upload.upload.category.clone(),
            caption: upload.upload.caption.clone(),
            location: upload.upload.location,
        };

        report.attempted += 1;
        let result = match upload.kind() {
            UploadKind::Photo => self.remote.upload_photo(&payload),
            UploadKind::File => self.remote.upload_file(&payload),
        };

        match result {
            Ok(server) => {
                let now = self.clock.now();
                let store = &self.store;
                store.transaction(|txn| -> SyncResult<_> {
                    store.uploads().record_success(txn, upload.id);
                    txn.put_entity(LocalEntity::confirmed(
                        upload.kind().entity_kind(),
                        server.id.clone(),
                        server.body.clone(),
                        now,
                    ));
                    Ok(())
                })?;
                self.stats.write().uploads_synced += 1;

                if let Err(e) = std::fs::remove_file(path) {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "failed to remove uploaded file");
                    }
                }
                Ok(ItemResult::Synced)
            }
            Err(e) if e.aborts_pass() => Err(e),
            Err(e) => {
                let status = self.store.uploads().record_failure(
                    upload.id,
                    &e.to_string(),
                    self.config.max_retry,
                    e.is_retryable(),
                    self.clock.now(),
                )?;
                warn!(upload_id = %upload.id, kind = %upload.kind(), %status, error = %e, "upload failed");
                self.note_failure(&e);
                Ok(match status {
                    QueueStatus::Pending => ItemResult::Retrying,
                    QueueStatus::Failed => ItemResult::Failed,
                })
            }
        }
    }

    fn note_failure(&self, error: &SyncError) {
        let mut stats = self.stats.write();
        stats.failures += 1;
        stats.last_error = Some(error.to_string());
    }

    // Reads and manual recovery

    /// Fetches the server copy of an entity and caches it.
    ///
    /// A cached copy with unconfirmed local changes is kept as is. Returns
    /// the entity as cached after the call.
    ///
    /// # Errors
    ///
    /// Remote failures, or [`SyncError::Precondition`] for a placeholder
    /// that has not been reconciled yet.
    pub fn refresh_entity(&self, kind: EntityKind, id: &EntityId) -> SyncResult<LocalEntity> {
        let id = self.store.resolve_id(id).unwrap_or_else(|| id.clone());
        if id.is_local() {
            return Err(SyncError::precondition(format!("{id} is not synced yet")));
        }

        let server = self.remote.fetch_entity(kind, &id)?;
        let now = self.clock.now();
        self.store.transaction(|txn| -> SyncResult<_> {
            match txn.get_entity(kind, &id) {
                Some(cached) if cached.pending_sync => Ok(cached),
                _ => {
                    let entity = LocalEntity::confirmed(kind, id.clone(), server.body.clone(), now);
                    txn.put_entity(entity.clone());
                    Ok(entity)
                }
            }
        })
    }

    /// Actions needing manual resolution.
    pub fn failed_actions(&self) -> Vec<PendingAction> {
        self.store.actions().failed()
    }

    /// Uploads needing manual resolution.
    pub fn failed_uploads(&self) -> Vec<PendingUpload> {
        self.store.uploads().failed()
    }

    /// Discards or re-queues a failed action.
    ///
    /// # Errors
    ///
    /// Unknown id, or the action is not failed.
    pub fn resolve_failed_action(&self, id: ActionId, resolution: Resolution) -> SyncResult<()> {
        Ok(self.store.actions().resolve_failed(id, resolution)?)
    }

    /// Discards or re-queues a failed upload.
    ///
    /// # Errors
    ///
    /// Unknown id, or the upload is not failed.
    pub fn resolve_failed_upload(&self, id: UploadId, resolution: Resolution) -> SyncResult<()> {
        Ok(self.store.uploads().resolve_failed(id, resolution)?)
    }
}

/// Builds the local copy of a reconciled entity.
///
/// Updates still queued for the same entity are replayed over the server
/// body, and the entity stays unconfirmed until they are synced too.
fn reconciled_entity(
    txn: &StoreTxn<'_>,
    synced: &PendingAction,
    kind: EntityKind,
    id: EntityId,
    server: &ServerEntity,
    now: Timestamp,
) -> LocalEntity {
    let mut body = server.body.clone();
    let mut queued = 0usize;
    for action in txn.list_actions() {
        if action.id == synced.id || action.mutation.entity_kind() != kind {
            continue;
        }
        let Some(target) = action.mutation.target() else {
            continue;
        };
        let resolved = txn.resolve_id(target).unwrap_or_else(|| target.clone());
        if resolved == id {
            action.mutation.apply_patch(&mut body);
            queued += 1;
        }
    }

    if queued == 0 {
        LocalEntity::confirmed(kind, id, body, now)
    } else {
        debug!(entity = %id, queued, "queued updates kept over server body");
        LocalEntity::optimistic(kind, id, body, now)
    }
}

impl<R: RemoteApi, C: Clock> std::fmt::Debug for SyncEngine<R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("counts", &self.store.counts())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MockRemote, RemoteOperation};
    use fieldsync_core::{DailyLogUpdate, ManualClock, NewAnnotation, NewDailyLog};
    use serde_json::json;

    fn engine() -> SyncEngine<MockRemote, Arc<ManualClock>> {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        SyncEngine::with_clock(
            store,
            Arc::new(MockRemote::new()),
            Arc::new(ManualClock::new(1_000)),
            SyncConfig::default(),
        )
    }

    fn create_log(engine: &SyncEngine<MockRemote, Arc<ManualClock>>) -> EntityId {
        engine
            .enqueue_mutation(Mutation::CreateDailyLog(NewDailyLog::new("prj_1", "2025-01-10")))
            .unwrap()
    }

    #[test]
    fn create_writes_optimistic_entity_and_action() {
        let engine = engine();
        let id = create_log(&engine);

        assert!(id.is_local());
        let entity = engine.store().get_entity(EntityKind::DailyLog, &id).unwrap();
        assert!(entity.pending_sync);
        assert_eq!(entity.body["date"], "2025-01-10");

        let actions = engine.store().list_actions(None);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].local_id, id);
        assert_eq!(actions[0].created_at, 1_000);
    }

    #[test]
    fn update_patches_cached_entity() {
        let engine = engine();
        engine
            .store()
            .transaction(|txn| {
                txn.put_entity(LocalEntity::confirmed(
                    EntityKind::DailyLog,
                    EntityId::server("srv_5"),
                    json!({"id": "srv_5", "notes": "old"}),
                    0,
                ));
                Ok::<_, SyncError>(())
            })
            .unwrap();

        let id = engine
            .enqueue_mutation(Mutation::UpdateDailyLog(
                DailyLogUpdate::new("srv_5").with_notes("new"),
            ))
            .unwrap();

        assert_eq!(id, EntityId::server("srv_5"));
        let entity = engine.store().get_entity(EntityKind::DailyLog, &id).unwrap();
        assert!(entity.pending_sync);
        assert_eq!(entity.body["notes"], "new");
    }

    #[test]
    fn update_without_cached_entity_still_queues() {
        let engine = engine();
        engine
            .enqueue_mutation(Mutation::UpdateDailyLog(DailyLogUpdate::new("srv_missing")))
            .unwrap();
        assert_eq!(engine.counts().pending_actions, 1);
        assert!(engine.store().list_entities(EntityKind::DailyLog).is_empty());
    }

    #[test]
    fn sub_resource_has_no_local_entity() {
        let engine = engine();
        engine
            .enqueue_mutation(Mutation::CreateAnnotation(NewAnnotation {
                document_id: "doc_1".into(),
                page: 1,
                content: "arrow".into(),
            }))
            .unwrap();
        assert!(engine.store().list_entities(EntityKind::Annotation).is_empty());
        assert_eq!(engine.counts().pending_actions, 1);
    }

    #[test]
    fn empty_queues_are_trivial_success() {
        let engine = engine();
        let outcome = engine.run_pass().unwrap();
        assert_eq!(outcome, SyncOutcome::Success(PassReport::default()));
        assert!(engine.remote().calls().is_empty());
        assert_eq!(engine.stats().passes, 1);
    }

    #[test]
    fn pass_reconciles_create() {
        let engine = engine();
        let placeholder = create_log(&engine);

        let outcome = engine.run_pass().unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.report().succeeded, 1);

        let server_id = engine.store().resolve_id(&placeholder).unwrap();
        assert!(!server_id.is_local());
        assert!(engine.store().get_entity(EntityKind::DailyLog, &placeholder).is_none());
        let entity = engine.store().get_entity(EntityKind::DailyLog, &server_id).unwrap();
        assert!(!entity.pending_sync);
        assert!(engine.counts().is_idle());
        assert_eq!(engine.stats().actions_synced, 1);
    }

    #[test]
    fn update_after_reconciled_create_targets_server_id() {
        let engine = engine();
        let placeholder = create_log(&engine);
        engine.run_pass().unwrap();

        engine
            .enqueue_mutation(Mutation::UpdateDailyLog(
                DailyLogUpdate::new(placeholder).with_notes("late"),
            ))
            .unwrap();
        let action = &engine.store().list_actions(None)[0];
        assert_eq!(action.mutation.target(), Some(&EntityId::server("srv_1")));
    }

    #[test]
    fn retryable_failure_schedules_retry() {
        let engine = engine();
        create_log(&engine);
        engine
            .remote()
            .fail_next(RemoteOperation::CreateDailyLog, SyncError::Timeout);

        let outcome = engine.run_pass().unwrap();
        assert!(outcome.needs_retry());
        let action = &engine.store().list_actions(None)[0];
        assert_eq!(action.status(), QueueStatus::Pending);
        assert_eq!(action.retry_count(), 1);
        assert_eq!(engine.stats().failures, 1);
    }

    #[test]
    fn refresh_keeps_unconfirmed_local_copy() {
        let engine = engine();
        let placeholder = create_log(&engine);
        assert!(matches!(
            engine.refresh_entity(EntityKind::DailyLog, &placeholder),
            Err(SyncError::Precondition(_))
        ));

        engine
            .store()
            .transaction(|txn| {
                txn.put_entity(LocalEntity::optimistic(
                    EntityKind::Document,
                    EntityId::server("doc_1"),
                    json!({"title": "mine"}),
                    0,
                ));
                Ok::<_, SyncError>(())
            })
            .unwrap();
        let kept = engine
            .refresh_entity(EntityKind::Document, &EntityId::server("doc_1"))
            .unwrap();
        assert_eq!(kept.body["title"], "mine");

        let fetched = engine
            .refresh_entity(EntityKind::Document, &EntityId::server("doc_2"))
            .unwrap();
        assert!(!fetched.pending_sync);
    }

    #[test]
    fn cancel_before_pass_stops_only_the_next_pass() {
        let engine = engine();
        create_log(&engine);
        engine.remote().set_connected(false);

        engine.cancel();
        assert!(matches!(engine.run_pass(), Err(SyncError::Cancelled)));
        let untouched = engine.store().list_actions(None);
        assert_eq!(untouched[0].retry_count(), 0);

        let outcome = engine.run_pass().unwrap();
        assert!(outcome.needs_retry());
    }

    #[test]
    fn cancel_while_another_caller_waits_is_not_lost() {
        let engine = Arc::new(engine());
        create_log(&engine);

        let held = engine.pass_lock.lock();
        let waiter = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.run_pass())
        };
        std::thread::sleep(Duration::from_millis(50));
        engine.cancel();
        drop(held);

        assert!(matches!(waiter.join().unwrap(), Err(SyncError::Cancelled)));
        assert_eq!(engine.store().list_actions(None).len(), 1);
        assert_eq!(engine.remote().call_count(RemoteOperation::CreateDailyLog), 0);
    }
}
