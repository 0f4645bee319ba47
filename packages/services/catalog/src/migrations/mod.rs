//! Index migrations. Each migration registers itself with
//! [`register_migration!`] and is picked up by [`MigrationRunner`] at
//! startup or through `catalog-service migrate`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, DateTime as BsonDateTime, Document};
use mongodb::Database;

mod m001_catalog_indexes;
mod m002_audit_statistics_indexes;

pub use inventory;

pub const VERSION_COLLECTION: &str = "_migrations";
pub const SERVICE_NAME: &str = "catalog";

#[async_trait]
pub trait Migration: Send + Sync {
    fn version(&self) -> u32;
    fn description(&self) -> &str;
    async fn up(&self, db: &Database) -> Result<()>;
}

pub struct MigrationRegistration {
    pub name: &'static str,
    pub constructor: fn() -> Box<dyn Migration>,
}

impl MigrationRegistration {
    pub const fn new(name: &'static str, constructor: fn() -> Box<dyn Migration>) -> Self {
        Self { name, constructor }
    }
}

inventory::collect!(MigrationRegistration);

#[macro_export]
macro_rules! register_migration {
    ($migration_type:ty) => {
        $crate::migrations::inventory::submit! {
            $crate::migrations::MigrationRegistration::new(
                stringify!($migration_type),
                || Box::new(<$migration_type>::default())
            )
        }
    };
}

/// Every registered migration, ordered by version.
pub fn registered_migrations() -> Vec<Box<dyn Migration>> {
    let mut migrations: Vec<Box<dyn Migration>> = inventory::iter::<MigrationRegistration>()
        .map(|reg| (reg.constructor)())
        .collect();
    migrations.sort_by_key(|m| m.version());
    migrations
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationState {
    pub version: u32,
    pub description: String,
    pub applied: bool,
}

pub struct MigrationRunner {
    db: Database,
    migrations: Vec<Box<dyn Migration>>,
}

impl MigrationRunner {
    pub fn new(db: Database) -> Self {
        Self::with_migrations(db, registered_migrations())
    }

    pub fn with_migrations(db: Database, mut migrations: Vec<Box<dyn Migration>>) -> Self {
        migrations.sort_by_key(|m| m.version());
        Self { db, migrations }
    }

    async fn applied_versions(&self) -> Result<Vec<u32>> {
        let coll = self.db.collection::<Document>(VERSION_COLLECTION);
        let cursor = coll.find(doc! { "service_name": SERVICE_NAME }, None).await?;
        let docs: Vec<Document> = cursor.try_collect().await?;
        Ok(docs.iter().filter_map(|d| d.get_i32("version").ok()).map(|v| v as u32).collect())
    }

    pub async fn status(&self) -> Result<Vec<MigrationState>> {
        let applied = self.applied_versions().await?;
        Ok(self
            .migrations
            .iter()
            .map(|m| MigrationState {
                version: m.version(),
                description: m.description().to_string(),
                applied: applied.contains(&m.version()),
            })
            .collect())
    }

    /// Applies every pending migration in version order. Stops at the first
    /// failure; earlier migrations stay recorded.
    pub async fn migrate_up(&self) -> Result<Vec<u32>> {
        let applied = self.applied_versions().await?;
        let coll = self.db.collection::<Document>(VERSION_COLLECTION);
        let mut executed = Vec::new();
        for migration in self.migrations.iter().filter(|m| !applied.contains(&m.version())) {
            let version = migration.version();
            tracing::info!(version, description = migration.description(), "Applying migration");
            migration
                .up(&self.db)
                .await
                .map_err(|e| anyhow!("migration {} failed: {}", version, e))?;
            coll.insert_one(
                doc! {
                    "service_name": SERVICE_NAME,
                    "version": version as i32,
                    "description": migration.description(),
                    "executed_at": BsonDateTime::now(),
                },
                None,
            )
            .await?;
            executed.push(version);
        }
        if executed.is_empty() {
            tracing::info!("No pending migrations");
        }
        Ok(executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_registered_in_order() {
        let versions: Vec<u32> = registered_migrations().iter().map(|m| m.version()).collect();
        assert_eq!(versions, vec![1, 2]);
    }
}
