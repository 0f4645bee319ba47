use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::catalog::CatalogStore;
use crate::config::{Config, StorageKind};
use crate::ingestion::IngestionEngine;
use crate::migrations::MigrationRunner;
use crate::models::ActorContext;
use crate::statistics::{RefreshOutcome, StatisticsAggregator};
use crate::storage::{CatalogBackend, MemoryBackend, MongoBackend};

/// Opens the configured backend. For MongoDB, pending migrations run first
/// when `AUTO_MIGRATE` is on.
pub async fn open_store(cfg: &Config) -> Result<CatalogStore> {
    let backend: Arc<dyn CatalogBackend> = match cfg.storage_backend {
        StorageKind::Mongodb => {
            let mongo = MongoBackend::connect(cfg).await?;
            if cfg.auto_migrate {
                tracing::info!("Running pending migrations on startup...");
                if let Err(e) = MigrationRunner::new(mongo.database().clone()).migrate_up().await {
                    tracing::warn!(error = %e, "Failed to run migrations on startup");
                }
            }
            Arc::new(mongo)
        }
        StorageKind::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on exit");
            Arc::new(MemoryBackend::new())
        }
    };
    tracing::info!(backend = backend.name(), "Catalog storage ready");
    Ok(CatalogStore::new(backend))
}

/// `catalog-service migrate [up|status]`
pub async fn run_migration_cli(cfg: &Config, args: &[String]) -> Result<()> {
    if cfg.storage_backend != StorageKind::Mongodb {
        bail!("migrations only apply to the mongodb storage backend");
    }
    let mongo = MongoBackend::connect(cfg).await?;
    let runner = MigrationRunner::new(mongo.database().clone());
    match args.first().map(String::as_str).unwrap_or("status") {
        "up" => {
            let applied = runner.migrate_up().await?;
            println!("Applied {} migration(s): {:?}", applied.len(), applied);
        }
        "status" => {
            for state in runner.status().await? {
                let mark = if state.applied { "applied" } else { "pending" };
                println!("{:>4}  {:<8}  {}", state.version, mark, state.description);
            }
        }
        other => bail!("unknown migrate command '{}'; expected up or status", other),
    }
    Ok(())
}

/// `catalog-service ingest [path]`
pub async fn run_ingest_cli(cfg: &Config, args: &[String]) -> Result<()> {
    let store = open_store(cfg).await?;
    let engine = IngestionEngine::new(store, cfg.clone());
    let path = args.first().cloned().unwrap_or_else(|| cfg.ingestion_source_path.clone());
    let report = engine.ingest_file(&ActorContext::user("cli"), Path::new(&path)).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// `catalog-service statistics`
pub async fn run_statistics_cli(cfg: &Config) -> Result<()> {
    let store = open_store(cfg).await?;
    let aggregator = StatisticsAggregator::new(store, cfg.top_brands_limit);
    let outcome = aggregator.refresh(&ActorContext::user("cli")).await?;
    if let RefreshOutcome::Stale { error, .. } = &outcome {
        eprintln!("warning: refresh failed, showing last snapshot: {}", error);
    }
    println!("{}", serde_json::to_string_pretty(&outcome.snapshot().data)?);
    Ok(())
}

pub fn print_usage() {
    println!(
        "Catalog Service

USAGE:
    catalog-service                      Start the HTTP server
    catalog-service migrate [up|status]  Apply or list index migrations (default: status)
    catalog-service ingest [path]        Ingest a .xml, .json or .jsonl source file
    catalog-service statistics           Recompute and print catalog statistics
    catalog-service help                 Show this message

Configuration is read from the environment and the crate's .env file."
    );
}
