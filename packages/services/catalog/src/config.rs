use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{CatalogError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Mongodb,
    Memory,
}

impl FromStr for StorageKind {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mongodb" | "mongo" => Ok(StorageKind::Mongodb),
            "memory" | "inmemory" => Ok(StorageKind::Memory),
            other => Err(CatalogError::Configuration(format!("unknown STORAGE_BACKEND '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    pub mongodb_uri: String,
    pub mongodb_retry_writes: bool,
    pub database_name: String,
    pub storage_backend: StorageKind,
    pub enable_scheduler: bool,
    // six-field cron: sec min hour day month weekday
    pub statistics_cron: String,
    pub top_brands_limit: usize,
    pub ingestion_source_path: String,
    pub xml_record_element: String,
    pub auto_migrate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8090,
            mongodb_uri: "mongodb://localhost:27017".to_string(),
            mongodb_retry_writes: false,
            database_name: "catalog".to_string(),
            storage_backend: StorageKind::Mongodb,
            enable_scheduler: true,
            statistics_cron: "0 0 * * * *".to_string(),
            top_brands_limit: 5,
            ingestion_source_path: "data/Autocatalog.xml".to_string(),
            xml_record_element: "car".to_string(),
            auto_migrate: true,
        }
    }
}

impl Config {
    /// Reads the environment; unset or unparsable values fall back to defaults.
    /// An unknown storage backend or a bad cron expression is an error.
    pub fn from_env() -> Result<Self> {
        let get = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        let d = Config::default();

        let storage_backend = match get("STORAGE_BACKEND") {
            Some(v) => v.parse()?,
            None => d.storage_backend,
        };

        let cfg = Self {
            port: get("PORT").and_then(|s| s.parse().ok()).unwrap_or(d.port),
            mongodb_uri: get("MONGODB_URI").unwrap_or(d.mongodb_uri),
            mongodb_retry_writes: get("MONGODB_RETRY_WRITES").and_then(|s| s.parse().ok()).unwrap_or(d.mongodb_retry_writes),
            database_name: get("DATABASE_NAME").unwrap_or(d.database_name),
            storage_backend,
            enable_scheduler: get("ENABLE_SCHEDULER").and_then(|s| s.parse().ok()).unwrap_or(d.enable_scheduler),
            statistics_cron: get("STATISTICS_CRON").unwrap_or(d.statistics_cron),
            top_brands_limit: get("TOP_BRANDS_LIMIT").and_then(|s| s.parse().ok()).unwrap_or(d.top_brands_limit),
            ingestion_source_path: get("INGESTION_SOURCE_PATH").unwrap_or(d.ingestion_source_path),
            xml_record_element: get("XML_RECORD_ELEMENT").unwrap_or(d.xml_record_element),
            auto_migrate: get("AUTO_MIGRATE").and_then(|s| s.parse().ok()).unwrap_or(d.auto_migrate),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        cron::Schedule::from_str(&self.statistics_cron).map_err(|e| {
            CatalogError::Configuration(format!("invalid STATISTICS_CRON '{}': {}", self.statistics_cron, e))
        })?;
        if self.xml_record_element.trim().is_empty() {
            return Err(CatalogError::Configuration("XML_RECORD_ELEMENT must not be empty".to_string()));
        }
        Ok(())
    }
}
