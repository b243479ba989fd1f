//! HTTP binding of the remote API.
//!
//! The actual HTTP client is abstracted behind [`HttpClient`] so the engine
//! does not pick a networking stack (reqwest, ureq, a platform client).
//! Bodies are JSON; uploads send the raw file bytes with metadata in headers.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteApi, ServerEntity, UploadPayload};
use fieldsync_core::{DailyLogUpdate, EntityId, EntityKind, NewAnnotation, NewDailyLog};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PATCH
    Patch,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
        })
    }
}

/// A request handed to the [`HttpClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
    /// Deadline for the whole exchange.
    pub timeout: Duration,
}

impl HttpRequest {
    /// Value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A response from the [`HttpClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with a JSON body.
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
        }
    }
}

/// Failure below the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// The request exceeded its timeout.
    TimedOut,
    /// The connection failed.
    Connection(String),
    /// The device has no connectivity.
    Offline,
}

impl From<TransportFailure> for SyncError {
    fn from(failure: TransportFailure) -> Self {
        match failure {
            TransportFailure::TimedOut => SyncError::Timeout,
            TransportFailure::Connection(message) => SyncError::transport(message),
            TransportFailure::Offline => SyncError::NotConnected,
        }
    }
}

/// HTTP client abstraction.
///
/// Implementations must honor [`HttpRequest::timeout`] and report an
/// expired deadline as [`TransportFailure::TimedOut`].
pub trait HttpClient: Send + Sync {
    /// Sends one request.
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure>;
}

/// [`RemoteApi`] over HTTP.
pub struct HttpRemoteApi<C: HttpClient> {
    /// Base URL of the API (e.g., "https://api.example.com/v1").
    base_url: String,
    client: C,
    timeout: Duration,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpRemoteApi<C> {
    /// Creates an API client with a 30 second request timeout.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout: Duration::from_secs(30),
            last_error: RwLock::new(None),
        }
    }

    /// Creates an API client using the request timeout of `config`.
    pub fn from_config(base_url: impl Into<String>, client: C, config: &SyncConfig) -> Self {
        Self::new(base_url, client).with_timeout(config.request_timeout)
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn send_json<T: Serialize>(
        &self,
        method: Method,
        path: &str,
        kind: EntityKind,
        body: &T,
    ) -> SyncResult<ServerEntity> {
        let body = serde_json::to_vec(body).map_err(|e| SyncError::Codec(e.to_string()))?;
        let headers = vec![("Content-Type".into(), "application/json".into())];
        self.send(method, path, headers, body, kind)
    }

    fn send_upload(&self, path: &str, kind: EntityKind, upload: &UploadPayload) -> SyncResult<ServerEntity> {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/octet-stream".to_string()),
            ("X-Parent-Id".to_string(), upload.parent_id.to_string()),
            ("X-File-Name".to_string(), upload.file_name.clone()),
        ];
        if let Some(category) = &upload.category {
            headers.push(("X-Category".into(), category.clone()));
        }
        if let Some(caption) = &upload.caption {
            headers.push(("X-Caption".into(), caption.clone()));
        }
        if let Some(location) = upload.location {
            headers.push((
                "X-Location".into(),
                format!("{},{}", location.latitude, location.longitude),
            ));
        }
        self.send(Method::Post, path, headers, upload.content.clone(), kind)
    }

    fn send(
        &self,
        method: Method,
        path: &str,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        kind: EntityKind,
    ) -> SyncResult<ServerEntity> {
        let request = HttpRequest {
            method,
            url: format!("{}{}", self.base_url, path),
            headers,
            body,
            timeout: self.timeout,
        };
        tracing::debug!(%method, url = %request.url, "remote request");

        let result = self
            .client
            .send(request)
            .map_err(SyncError::from)
            .and_then(|response| decode_response(kind, response));

        match &result {
            Ok(_) => *self.last_error.write() = None,
            Err(e) => *self.last_error.write() = Some(e.to_string()),
        }
        result
    }
}

impl<C: HttpClient> RemoteApi for HttpRemoteApi<C> {
    fn create_daily_log(&self, draft: &NewDailyLog) -> SyncResult<ServerEntity> {
        self.send_json(Method::Post, "/daily-logs", EntityKind::DailyLog, draft)
    }

    fn update_daily_log(&self, update: &DailyLogUpdate) -> SyncResult<ServerEntity> {
        let path = format!("/daily-logs/{}", update.id);
        self.send_json(Method::Patch, &path, EntityKind::DailyLog, update)
    }

    fn create_annotation(&self, annotation: &NewAnnotation) -> SyncResult<ServerEntity> {
        let path = format!("/documents/{}/annotations", annotation.document_id);
        self.send_json(Method::Post, &path, EntityKind::Annotation, annotation)
    }

    fn upload_photo(&self, upload: &UploadPayload) -> SyncResult<ServerEntity> {
        self.send_upload("/photos", EntityKind::Photo, upload)
    }

    fn upload_file(&self, upload: &UploadPayload) -> SyncResult<ServerEntity> {
        self.send_upload("/files", EntityKind::File, upload)
    }

    fn fetch_entity(&self, kind: EntityKind, id: &EntityId) -> SyncResult<ServerEntity> {
        let path = format!("/{}/{}", collection_path(kind), id);
        self.send(Method::Get, &path, Vec::new(), Vec::new(), kind)
    }
}

fn collection_path(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::DailyLog => "daily-logs",
        EntityKind::Document => "documents",
        EntityKind::Photo => "photos",
        EntityKind::File => "files",
        EntityKind::Annotation => "annotations",
    }
}

fn decode_response(kind: EntityKind, response: HttpResponse) -> SyncResult<ServerEntity> {
    if let Some(error) = SyncError::from_status(response.status, error_message(&response.body)) {
        return Err(error);
    }

    let body: Value = serde_json::from_slice(&response.body)
        .map_err(|e| SyncError::Protocol(format!("invalid response body: {e}")))?;
    let id = match body.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => return Err(SyncError::Protocol("response has no id".into())),
    };
    Ok(ServerEntity::new(kind, id, body))
}

fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}
