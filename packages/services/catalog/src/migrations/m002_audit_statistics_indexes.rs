use anyhow::Result;
use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use mongodb::{Database, IndexModel};

use crate::migrations::Migration;
use crate::models::EntityKind;
use crate::register_migration;
use crate::storage::mongo::AUDIT_COLLECTION;

#[derive(Default)]
pub struct AuditStatisticsIndexes;

register_migration!(AuditStatisticsIndexes);

#[async_trait]
impl Migration for AuditStatisticsIndexes {
    fn version(&self) -> u32 { 2 }
    fn description(&self) -> &str { "Query indexes for audit_log and statistics" }

    async fn up(&self, db: &Database) -> Result<()> {
        tracing::info!("Creating audit and statistics indexes");

        let audit = db.collection::<Document>(AUDIT_COLLECTION);
        audit.create_index(IndexModel::builder().keys(doc! { "timestamp": -1 }).build(), None).await?;
        audit.create_index(IndexModel::builder().keys(doc! { "entity_type": 1, "entity_id": 1, "timestamp": -1 }).build(), None).await?;
        audit.create_index(IndexModel::builder().keys(doc! { "action": 1 }).build(), None).await?;

        let stats = db.collection::<Document>(EntityKind::Statistic.collection());
        stats.create_index(IndexModel::builder().keys(doc! { "created_at": -1 }).build(), None).await?;
        Ok(())
    }
}
