use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};

use crate::models::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, async_graphql::Enum)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Updated => "updated",
            AuditAction::Deleted => "deleted",
        }
    }
}

/// Immutable audit entry. Never updated or deleted after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub entity_type: EntityKind,
    pub entity_id: Option<ObjectId>,
    pub action: AuditAction,
    pub changes: serde_json::Value,
    pub actor: Option<String>,
    pub timestamp: BsonDateTime,
}

impl AuditRecord {
    pub fn new(
        entity_type: EntityKind,
        entity_id: Option<ObjectId>,
        action: AuditAction,
        changes: serde_json::Value,
        actor: &ActorContext,
    ) -> Self {
        Self {
            id: None,
            entity_type,
            entity_id,
            action,
            changes,
            actor: actor.actor().map(str::to_string),
            timestamp: BsonDateTime::now(),
        }
    }
}

/// Who is performing a mutation. Passed explicitly into every mutating call;
/// anonymous contexts produce audit records with a null actor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorContext {
    actor: Option<String>,
}

impl ActorContext {
    pub fn anonymous() -> Self {
        Self { actor: None }
    }

    pub fn user(actor: impl Into<String>) -> Self {
        let actor = actor.into();
        let trimmed = actor.trim();
        if trimmed.is_empty() {
            Self::anonymous()
        } else {
            Self { actor: Some(trimmed.to_string()) }
        }
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }
}

/// Admin-side filter over the audit log. Results are always newest first.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub entity_type: Option<EntityKind>,
    pub action: Option<AuditAction>,
    pub entity_id: Option<ObjectId>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.entity_type.map_or(true, |k| record.entity_type == k)
            && self.action.map_or(true, |a| record.action == a)
            && self.entity_id.map_or(true, |id| record.entity_id == Some(id))
    }
}
