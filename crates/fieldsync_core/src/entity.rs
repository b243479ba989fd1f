//! Cached copies of server-owned resources.

use crate::clock::Timestamp;
use crate::id::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The resource types the local cache holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A site daily log.
    DailyLog,
    /// A project document.
    Document,
    /// An uploaded photo.
    Photo,
    /// An uploaded generic file.
    File,
    /// A document annotation.
    Annotation,
}

impl EntityKind {
    /// All kinds, in table order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::DailyLog,
        EntityKind::Document,
        EntityKind::Photo,
        EntityKind::File,
        EntityKind::Annotation,
    ];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::DailyLog => "daily_log",
            EntityKind::Document => "document",
            EntityKind::Photo => "photo",
            EntityKind::File => "file",
            EntityKind::Annotation => "annotation",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached entity.
///
/// `pending_sync` is true while the row holds an optimistic write the server
/// has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntity {
    /// Entity type.
    pub kind: EntityKind,
    /// Server id or local placeholder.
    pub id: EntityId,
    /// Server representation, or the optimistic draft.
    pub body: serde_json::Value,
    /// Optimistically written and not yet confirmed.
    pub pending_sync: bool,
    /// Last local write.
    pub updated_at: Timestamp,
}

impl LocalEntity {
    /// Creates an optimistic (unconfirmed) entity.
    #[must_use]
    pub fn optimistic(
        kind: EntityKind,
        id: EntityId,
        body: serde_json::Value,
        now: Timestamp,
    ) -> Self {
        Self {
            kind,
            id,
            body,
            pending_sync: true,
            updated_at: now,
        }
    }

    /// Creates a confirmed entity from a server representation.
    #[must_use]
    pub fn confirmed(
        kind: EntityKind,
        id: EntityId,
        body: serde_json::Value,
        now: Timestamp,
    ) -> Self {
        Self {
            kind,
            id,
            body,
            pending_sync: false,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn optimistic_entities_are_pending() {
        let entity = LocalEntity::optimistic(
            EntityKind::DailyLog,
            EntityId::new_local(),
            json!({"date": "2025-01-10"}),
            5,
        );
        assert!(entity.pending_sync);

        let entity = LocalEntity::confirmed(EntityKind::DailyLog, "srv_1".into(), json!({}), 5);
        assert!(!entity.pending_sync);
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(EntityKind::DailyLog.to_string(), "daily_log");
        assert_eq!(EntityKind::ALL.len(), 5);
    }
}
