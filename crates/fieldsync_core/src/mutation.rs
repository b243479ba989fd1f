//! Typed mutations carried by pending actions.
//!
//! Each variant of [`Mutation`] is one replayable remote operation and carries
//! everything needed to replay it without further context, including foreign
//! keys that may still be local placeholders.

use crate::entity::EntityKind;
use crate::id::EntityId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How a mutation is reconciled after the server accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    /// Creates a top-level entity; reconciliation swaps placeholder for server id.
    Create,
    /// Updates an existing entity; reconciliation overwrites the cached copy.
    Update,
    /// Creates a sub-resource that is not cached locally.
    CreateSubResource,
}

/// Draft of a new daily log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDailyLog {
    /// Owning project.
    pub project_id: EntityId,
    /// Log date (`YYYY-MM-DD`).
    pub date: String,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Weather summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<String>,
    /// Crew headcount on site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crew_count: Option<u32>,
}

impl NewDailyLog {
    /// Creates a draft with only the required fields.
    pub fn new(project_id: impl Into<EntityId>, date: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            date: date.into(),
            notes: None,
            weather: None,
            crew_count: None,
        }
    }

    /// Sets the notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Partial update of a daily log. `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLogUpdate {
    /// Log being updated; may be a placeholder created earlier in the queue.
    pub id: EntityId,
    /// New notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// New weather summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<String>,
    /// New crew headcount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crew_count: Option<u32>,
}

impl DailyLogUpdate {
    /// Creates an empty patch for `id`.
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            notes: None,
            weather: None,
            crew_count: None,
        }
    }

    /// Sets the notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Sets the crew headcount.
    #[must_use]
    pub fn with_crew_count(mut self, crew_count: u32) -> Self {
        self.crew_count = Some(crew_count);
        self
    }
}

/// A new annotation on a document page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAnnotation {
    /// Annotated document.
    pub document_id: EntityId,
    /// 1-based page number.
    pub page: u32,
    /// Serialized annotation content (ink strokes, text, markup).
    pub content: String,
}

/// A queued mutation.
///
/// The variant is the action type; the dispatcher matches on it exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Mutation {
    /// Create a daily log.
    CreateDailyLog(NewDailyLog),
    /// Update a daily log.
    UpdateDailyLog(DailyLogUpdate),
    /// Annotate a document.
    CreateAnnotation(NewAnnotation),
}

impl Mutation {
    /// Reconciliation class of this mutation.
    #[must_use]
    pub fn class(&self) -> ActionClass {
        match self {
            Mutation::CreateDailyLog(_) => ActionClass::Create,
            Mutation::UpdateDailyLog(_) => ActionClass::Update,
            Mutation::CreateAnnotation(_) => ActionClass::CreateSubResource,
        }
    }

    /// Kind of the entity this mutation creates or changes.
    #[must_use]
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            Mutation::CreateDailyLog(_) | Mutation::UpdateDailyLog(_) => EntityKind::DailyLog,
            Mutation::CreateAnnotation(_) => EntityKind::Annotation,
        }
    }

    /// Short name used in logs and diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::CreateDailyLog(_) => "create_daily_log",
            Mutation::UpdateDailyLog(_) => "update_daily_log",
            Mutation::CreateAnnotation(_) => "create_annotation",
        }
    }

    /// Entity targeted by an update.
    #[must_use]
    pub fn target(&self) -> Option<&EntityId> {
        match self {
            Mutation::UpdateDailyLog(update) => Some(&update.id),
            Mutation::CreateDailyLog(_) | Mutation::CreateAnnotation(_) => None,
        }
    }

    /// Every entity id embedded in the payload.
    #[must_use]
    pub fn references(&self) -> Vec<&EntityId> {
        match self {
            Mutation::CreateDailyLog(draft) => vec![&draft.project_id],
            Mutation::UpdateDailyLog(update) => vec![&update.id],
            Mutation::CreateAnnotation(annotation) => vec![&annotation.document_id],
        }
    }

    /// Rewrites embedded ids through `resolve`.
    ///
    /// `resolve` returns the server id for a reconciled placeholder and `None`
    /// for anything else. Returns true if any id changed.
    pub fn resolve_ids<F>(&mut self, resolve: F) -> bool
    where
        F: Fn(&EntityId) -> Option<EntityId>,
    {
        let slots: Vec<&mut EntityId> = match self {
            Mutation::CreateDailyLog(draft) => vec![&mut draft.project_id],
            Mutation::UpdateDailyLog(update) => vec![&mut update.id],
            Mutation::CreateAnnotation(annotation) => vec![&mut annotation.document_id],
        };

        let mut changed = false;
        for slot in slots {
            if !slot.is_local() {
                continue;
            }
            if let Some(server_id) = resolve(&*slot) {
                *slot = server_id;
                changed = true;
            }
        }
        changed
    }

    /// Draft body written optimistically for a create.
    #[must_use]
    pub fn optimistic_body(&self) -> Option<Value> {
        match self {
            Mutation::CreateDailyLog(draft) => serde_json::to_value(draft).ok(),
            Mutation::UpdateDailyLog(_) | Mutation::CreateAnnotation(_) => None,
        }
    }

    /// Applies an update's fields onto a cached body.
    ///
    /// Non-object bodies are replaced by an object holding just the patch.
    pub fn apply_patch(&self, body: &mut Value) {
        let Mutation::UpdateDailyLog(update) = self else {
            return;
        };

        if !body.is_object() {
            *body = Value::Object(Map::new());
        }
        if let Value::Object(fields) = body {
            if let Some(notes) = &update.notes {
                fields.insert("notes".into(), Value::from(notes.clone()));
            }
            if let Some(weather) = &update.weather {
                fields.insert("weather".into(), Value::from(weather.clone()));
            }
            if let Some(crew_count) = update.crew_count {
                fields.insert("crew_count".into(), Value::from(crew_count));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classes_follow_variants() {
        let create = Mutation::CreateDailyLog(NewDailyLog::new("prj_1", "2025-01-10"));
        let update = Mutation::UpdateDailyLog(DailyLogUpdate::new("srv_1"));
        let annotate = Mutation::CreateAnnotation(NewAnnotation {
            document_id: "doc_1".into(),
            page: 2,
            content: "circle".into(),
        });

        assert_eq!(create.class(), ActionClass::Create);
        assert_eq!(update.class(), ActionClass::Update);
        assert_eq!(annotate.class(), ActionClass::CreateSubResource);
        assert_eq!(annotate.entity_kind(), EntityKind::Annotation);
        assert_eq!(update.target(), Some(&EntityId::from("srv_1")));
    }

    #[test]
    fn resolve_ids_rewrites_only_mapped_placeholders() {
        let placeholder = EntityId::new_local();
        let mut update = Mutation::UpdateDailyLog(DailyLogUpdate::new(placeholder.clone()));

        let changed = update.resolve_ids(|id| {
            (id == &placeholder).then(|| EntityId::server("srv_123"))
        });
        assert!(changed);
        assert_eq!(update.target(), Some(&EntityId::from("srv_123")));

        // Server ids are never passed to the resolver.
        let changed = update.resolve_ids(|_| Some(EntityId::server("other")));
        assert!(!changed);
    }

    #[test]
    fn patch_sets_only_present_fields() {
        let update = Mutation::UpdateDailyLog(
            DailyLogUpdate::new("srv_1")
                .with_notes("pour complete")
                .with_crew_count(12),
        );
        let mut body = json!({"date": "2025-01-10", "weather": "rain"});
        update.apply_patch(&mut body);

        assert_eq!(
            body,
            json!({"date": "2025-01-10", "weather": "rain", "notes": "pour complete", "crew_count": 12})
        );
    }

    #[test]
    fn serialized_form_is_tagged() {
        let create = Mutation::CreateDailyLog(NewDailyLog::new("prj_1", "2025-01-10"));
        let value = serde_json::to_value(&create).unwrap();
        assert_eq!(value["type"], "create_daily_log");
        assert_eq!(value["payload"]["date"], "2025-01-10");

        let back: Mutation = serde_json::from_value(value).unwrap();
        assert_eq!(back, create);
    }
}
