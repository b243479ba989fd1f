//! Pending binary uploads (photos and generic files).

use crate::clock::Timestamp;
use crate::entity::EntityKind;
use crate::id::{EntityId, UploadId};
use crate::status::{QueueStatus, RetryState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which upload queue an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadKind {
    /// A site photo.
    Photo,
    /// Any other file.
    File,
}

impl UploadKind {
    /// Queues in drain order.
    pub const ALL: [UploadKind; 2] = [UploadKind::Photo, UploadKind::File];

    /// Entity kind the server returns for this upload.
    #[must_use]
    pub const fn entity_kind(self) -> EntityKind {
        match self {
            UploadKind::Photo => EntityKind::Photo,
            UploadKind::File => EntityKind::File,
        }
    }
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadKind::Photo => f.write_str("photo"),
            UploadKind::File => f.write_str("file"),
        }
    }
}

/// WGS84 coordinates attached to a photo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// Request to queue an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUpload {
    /// Queue the upload goes to.
    pub kind: UploadKind,
    /// Entity the upload attaches to; may be a placeholder.
    pub parent_id: EntityId,
    /// File on local disk.
    pub local_path: PathBuf,
    /// Domain category (e.g. "progress", "safety").
    pub category: Option<String>,
    /// Caption or description.
    pub caption: Option<String>,
    /// Where the photo was taken.
    pub location: Option<GeoPoint>,
}

impl NewUpload {
    /// A photo upload with no metadata.
    pub fn photo(parent_id: impl Into<EntityId>, local_path: impl Into<PathBuf>) -> Self {
        Self::new(UploadKind::Photo, parent_id, local_path)
    }

    /// A file upload with no metadata.
    pub fn file(parent_id: impl Into<EntityId>, local_path: impl Into<PathBuf>) -> Self {
        Self::new(UploadKind::File, parent_id, local_path)
    }

    fn new(kind: UploadKind, parent_id: impl Into<EntityId>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            parent_id: parent_id.into(),
            local_path: local_path.into(),
            category: None,
            caption: None,
            location: None,
        }
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Sets the caption.
    #[must_use]
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Sets the location.
    #[must_use]
    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.location = Some(GeoPoint {
            latitude,
            longitude,
        });
        self
    }
}

/// A queued binary upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingUpload {
    /// Queue position within its kind.
    pub id: UploadId,
    /// Upload metadata and source file.
    pub upload: NewUpload,
    /// When the upload was enqueued.
    pub created_at: Timestamp,
    /// Status and retry diagnostics.
    pub state: RetryState,
}

impl PendingUpload {
    /// Creates a fresh pending upload.
    #[must_use]
    pub fn new(id: UploadId, upload: NewUpload, now: Timestamp) -> Self {
        Self {
            id,
            upload,
            created_at: now,
            state: RetryState::pending(),
        }
    }

    /// Which queue this entry is in.
    #[must_use]
    pub fn kind(&self) -> UploadKind {
        self.upload.kind
    }

    /// Parent entity id.
    #[must_use]
    pub fn parent_id(&self) -> &EntityId {
        &self.upload.parent_id
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> QueueStatus {
        self.state.status
    }

    /// Returns true while the parent only exists locally.
    #[must_use]
    pub fn waits_on_parent(&self) -> bool {
        self.upload.parent_id.is_local()
    }
}
