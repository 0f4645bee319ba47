use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::models::*;
use crate::storage::CatalogBackend;

/// Hooks the catalog store calls around every mutation. Implementations must
/// not fail the mutation, so none of the hooks return errors.
#[async_trait]
pub trait MutationObserver: Send + Sync {
    /// Called once the new row has its identity.
    async fn created(&self, actor: &ActorContext, subject: &dyn AuditSubject);
    /// Called with the persisted state loaded before the write and the state written.
    async fn updated(&self, actor: &ActorContext, before: &dyn AuditSubject, after: &dyn AuditSubject);
    /// Called before the row is removed.
    async fn deleting(&self, actor: &ActorContext, subject: &dyn AuditSubject);
}

/// Field-level diff: `field -> {old, new}` for every field whose textual
/// form differs. Fields missing on one side compare against `"null"`.
pub fn diff_fields(before: &dyn AuditSubject, after: &dyn AuditSubject) -> Map<String, Value> {
    let old = before.audit_fields();
    let new = after.audit_fields();
    let mut changes = Map::new();
    for key in old.keys().chain(new.keys()) {
        if changes.contains_key(*key) {
            continue;
        }
        let old_val = old.get(key).map(String::as_str).unwrap_or("null");
        let new_val = new.get(key).map(String::as_str).unwrap_or("null");
        if old_val != new_val {
            changes.insert(key.to_string(), json!({ "old": old_val, "new": new_val }));
        }
    }
    changes
}

/// Writes audit records for tracked entity kinds. Failures are logged and
/// swallowed.
#[derive(Clone)]
pub struct AuditRecorder {
    backend: Arc<dyn CatalogBackend>,
}

impl AuditRecorder {
    pub fn new(backend: Arc<dyn CatalogBackend>) -> Self {
        Self { backend }
    }

    /// Persists one record. Returns `None` for untracked kinds.
    pub async fn record(
        &self,
        actor: &ActorContext,
        subject: &dyn AuditSubject,
        action: AuditAction,
        changes: Value,
    ) -> Result<Option<AuditRecord>> {
        let kind = subject.kind();
        if !kind.is_tracked() {
            return Ok(None);
        }
        let mut record = AuditRecord::new(kind, subject.entity_id(), action, changes, actor);
        let id = self.backend.insert_audit(&record).await?;
        record.id = Some(id);
        Ok(Some(record))
    }

    async fn record_logged(&self, actor: &ActorContext, subject: &dyn AuditSubject, action: AuditAction, changes: Value) {
        let kind = subject.kind();
        let entity_id = subject.entity_id().map(|id| id.to_hex());
        match self.record(actor, subject, action, changes).await {
            Ok(Some(_)) => {
                tracing::info!(
                    entity_type = %kind,
                    entity_id = entity_id.as_deref().unwrap_or("null"),
                    action = action.as_str(),
                    actor = actor.actor().unwrap_or("anonymous"),
                    "Audit record written"
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(
                    entity_type = %kind,
                    entity_id = entity_id.as_deref().unwrap_or("null"),
                    action = action.as_str(),
                    error = %e,
                    "Failed to write audit record; mutation proceeds"
                );
            }
        }
    }
}

#[async_trait]
impl MutationObserver for AuditRecorder {
    async fn created(&self, actor: &ActorContext, subject: &dyn AuditSubject) {
        self.record_logged(actor, subject, AuditAction::Created, json!({ "created": true })).await;
    }

    async fn updated(&self, actor: &ActorContext, before: &dyn AuditSubject, after: &dyn AuditSubject) {
        let changes = diff_fields(before, after);
        if changes.is_empty() {
            tracing::debug!(entity_type = %after.kind(), "Update without field changes; no audit record");
            return;
        }
        self.record_logged(actor, after, AuditAction::Updated, Value::Object(changes)).await;
    }

    async fn deleting(&self, actor: &ActorContext, subject: &dyn AuditSubject) {
        self.record_logged(actor, subject, AuditAction::Deleted, json!({ "deleted": true })).await;
    }
}
