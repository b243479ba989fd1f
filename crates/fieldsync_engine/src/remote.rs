//! Remote API contract for replaying queued work.

use crate::error::{SyncError, SyncResult};
use fieldsync_core::{
    DailyLogUpdate, EntityId, EntityKind, GeoPoint, NewAnnotation, NewDailyLog, UploadKind,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// An entity as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEntity {
    /// Entity type.
    pub kind: EntityKind,
    /// Server-assigned id.
    pub id: EntityId,
    /// Canonical server representation.
    pub body: Value,
}

impl ServerEntity {
    /// Creates a server entity.
    pub fn new(kind: EntityKind, id: impl Into<EntityId>, body: Value) -> Self {
        Self {
            kind,
            id: id.into(),
            body,
        }
    }
}

/// A binary upload ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPayload {
    /// Parent entity; always a server id by the time it is sent.
    pub parent_id: EntityId,
    /// File name reported to the server.
    pub file_name: String,
    /// File contents.
    pub content: Vec<u8>,
    /// Domain category.
    pub category: Option<String>,
    /// Caption or description.
    pub caption: Option<String>,
    /// Where the photo was taken.
    pub location: Option<GeoPoint>,
}

/// The server operations the sync engine replays.
///
/// Implementations must bound every call with a timeout and report it as
/// [`SyncError::Timeout`]. Calls block the current thread.
pub trait RemoteApi: Send + Sync {
    /// Creates a daily log.
    fn create_daily_log(&self, draft: &NewDailyLog) -> SyncResult<ServerEntity>;

    /// Applies a partial update to a daily log.
    fn update_daily_log(&self, update: &DailyLogUpdate) -> SyncResult<ServerEntity>;

    /// Creates an annotation on a document.
    fn create_annotation(&self, annotation: &NewAnnotation) -> SyncResult<ServerEntity>;

    /// Uploads a photo.
    fn upload_photo(&self, upload: &UploadPayload) -> SyncResult<ServerEntity>;

    /// Uploads a generic file.
    fn upload_file(&self, upload: &UploadPayload) -> SyncResult<ServerEntity>;

    /// Fetches the current server copy of an entity.
    fn fetch_entity(&self, kind: EntityKind, id: &EntityId) -> SyncResult<ServerEntity>;
}

/// Operation names, used to script [`MockRemote`] responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOperation {
    /// [`RemoteApi::create_daily_log`]
    CreateDailyLog,
    /// [`RemoteApi::update_daily_log`]
    UpdateDailyLog,
    /// [`RemoteApi::create_annotation`]
    CreateAnnotation,
    /// [`RemoteApi::upload_photo`]
    UploadPhoto,
    /// [`RemoteApi::upload_file`]
    UploadFile,
    /// [`RemoteApi::fetch_entity`]
    FetchEntity,
}

impl RemoteOperation {
    /// Upload operation for a queue kind.
    #[must_use]
    pub const fn upload(kind: UploadKind) -> Self {
        match kind {
            UploadKind::Photo => RemoteOperation::UploadPhoto,
            UploadKind::File => RemoteOperation::UploadFile,
        }
    }
}

/// A call received by [`MockRemote`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    /// Daily log creation.
    CreateDailyLog(NewDailyLog),
    /// Daily log update.
    UpdateDailyLog(DailyLogUpdate),
    /// Annotation creation.
    CreateAnnotation(NewAnnotation),
    /// Photo upload.
    UploadPhoto(UploadPayload),
    /// File upload.
    UploadFile(UploadPayload),
    /// Entity fetch.
    FetchEntity(EntityKind, EntityId),
}

impl RemoteCall {
    /// Operation this call invoked.
    #[must_use]
    pub fn operation(&self) -> RemoteOperation {
        match self {
            RemoteCall::CreateDailyLog(_) => RemoteOperation::CreateDailyLog,
            RemoteCall::UpdateDailyLog(_) => RemoteOperation::UpdateDailyLog,
            RemoteCall::CreateAnnotation(_) => RemoteOperation::CreateAnnotation,
            RemoteCall::UploadPhoto(_) => RemoteOperation::UploadPhoto,
            RemoteCall::UploadFile(_) => RemoteOperation::UploadFile,
            RemoteCall::FetchEntity(..) => RemoteOperation::FetchEntity,
        }
    }
}

/// A scriptable in-memory server for tests.
///
/// Each operation answers from its queue of scripted responses first. When
/// the queue is empty the call succeeds with a fresh `srv_<n>` id and the
/// request echoed as the body. Every call is logged.
#[derive(Debug)]
pub struct MockRemote {
    connected: AtomicBool,
    next_id: AtomicU64,
    scripted: Mutex<HashMap<RemoteOperation, VecDeque<SyncResult<ServerEntity>>>>,
    calls: Mutex<Vec<RemoteCall>>,
}

impl MockRemote {
    /// Creates a connected mock that accepts everything.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            scripted: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues a response for the next call of `operation`.
    pub fn push_response(&self, operation: RemoteOperation, response: SyncResult<ServerEntity>) {
        self.scripted
            .lock()
            .entry(operation)
            .or_default()
            .push_back(response);
    }

    /// Queues a failure for the next call of `operation`.
    pub fn fail_next(&self, operation: RemoteOperation, error: SyncError) {
        self.push_response(operation, Err(error));
    }

    /// Queues `times` failures built by `error`.
    pub fn fail_times<F>(&self, operation: RemoteOperation, times: usize, error: F)
    where
        F: Fn() -> SyncError,
    {
        for _ in 0..times {
            self.fail_next(operation, error());
        }
    }

    /// Sets connectivity. While disconnected every call fails with
    /// [`SyncError::NotConnected`] and is still logged.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Number of calls of one operation.
    pub fn call_count(&self, operation: RemoteOperation) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }

    fn respond<T: Serialize>(
        &self,
        call: RemoteCall,
        kind: EntityKind,
        existing: Option<&EntityId>,
        echo: &T,
    ) -> SyncResult<ServerEntity> {
        let operation = call.operation();
        self.calls.lock().push(call);

        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        if let Some(response) = self
            .scripted
            .lock()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            return response;
        }

        let id = match existing {
            Some(id) => id.clone(),
            None => EntityId::server(format!(
                "srv_{}",
                self.next_id.fetch_add(1, Ordering::SeqCst)
            )),
        };
        let mut body = serde_json::to_value(echo).map_err(|e| SyncError::Codec(e.to_string()))?;
        if let Value::Object(fields) = &mut body {
            fields.insert("id".into(), Value::from(id.as_str()));
        }
        Ok(ServerEntity::new(kind, id, body))
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct UploadEcho<'a> {
    parent_id: &'a EntityId,
    file_name: &'a str,
    size: usize,
    category: Option<&'a str>,
    caption: Option<&'a str>,
}

impl<'a> From<&'a UploadPayload> for UploadEcho<'a> {
    fn from(upload: &'a UploadPayload) -> Self {
        Self {
            parent_id: &upload.parent_id,
            file_name: &upload.file_name,
            size: upload.content.len(),
            category: upload.category.as_deref(),
            caption: upload.caption.as_deref(),
        }
    }
}

impl RemoteApi for MockRemote {
    fn create_daily_log(&self, draft: &NewDailyLog) -> SyncResult<ServerEntity> {
        self.respond(
            RemoteCall::CreateDailyLog(draft.clone()),
            EntityKind::DailyLog,
            None,
            draft,
        )
    }

    fn update_daily_log(&self, update: &DailyLogUpdate) -> SyncResult<ServerEntity> {
        self.respond(
            RemoteCall::UpdateDailyLog(update.clone()),
            EntityKind::DailyLog,
            Some(&update.id),
            update,
        )
    }

    fn create_annotation(&self, annotation: &NewAnnotation) -> SyncResult<ServerEntity> {
        self.respond(
            RemoteCall::CreateAnnotation(annotation.clone()),
            EntityKind::Annotation,
            None,
            annotation,
        )
    }

    fn upload_photo(&self, upload: &UploadPayload) -> SyncResult<ServerEntity> {
        self.respond(
            RemoteCall::UploadPhoto(upload.clone()),
            EntityKind::Photo,
            None,
            &UploadEcho::from(upload),
        )
    }

    fn upload_file(&self, upload: &UploadPayload) -> SyncResult<ServerEntity> {
        self.respond(
            RemoteCall::UploadFile(upload.clone()),
            EntityKind::File,
            None,
            &UploadEcho::from(upload),
        )
    }

    fn fetch_entity(&self, kind: EntityKind, id: &EntityId) -> SyncResult<ServerEntity> {
        self.respond(
            RemoteCall::FetchEntity(kind, id.clone()),
            kind,
            Some(id),
            &serde_json::json!({ "id": id }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unscripted_calls_succeed_with_fresh_ids() {
        let remote = MockRemote::new();
        let first = remote
            .create_daily_log(&NewDailyLog::new("prj_1", "2025-01-10"))
            .unwrap();
        let second = remote
            .create_daily_log(&NewDailyLog::new("prj_1", "2025-01-11"))
            .unwrap();

        assert_eq!(first.id, EntityId::server("srv_1"));
        assert_eq!(second.id, EntityId::server("srv_2"));
        assert_eq!(first.body["date"], "2025-01-10");
        assert_eq!(remote.call_count(RemoteOperation::CreateDailyLog), 2);
    }

    #[test]
    fn scripted_responses_come_first() {
        let remote = MockRemote::new();
        remote.fail_next(
            RemoteOperation::CreateDailyLog,
            SyncError::Server {
                status: 503,
                message: "unavailable".into(),
            },
        );

        let draft = NewDailyLog::new("prj_1", "2025-01-10");
        assert!(matches!(
            remote.create_daily_log(&draft),
            Err(SyncError::Server { status: 503, .. })
        ));
        assert!(remote.create_daily_log(&draft).is_ok());
    }

    #[test]
    fn updates_echo_target_id() {
        let remote = MockRemote::new();
        let entity = remote
            .update_daily_log(&DailyLogUpdate::new("srv_42").with_notes("done"))
            .unwrap();
        assert_eq!(entity.id, EntityId::server("srv_42"));
        assert_eq!(entity.body["notes"], "done");
        assert_eq!(entity.body["id"], "srv_42");
    }

    #[test]
    fn disconnected_calls_fail_but_are_logged() {
        let remote = MockRemote::new();
        remote.set_connected(false);

        let result = remote.fetch_entity(EntityKind::Document, &EntityId::server("doc_1"));
        assert!(matches!(result, Err(SyncError::NotConnected)));
        assert_eq!(remote.calls().len(), 1);
    }
}
