pub mod catalog;
pub mod audit;
pub mod statistics;
pub mod ingestion;

pub use catalog::*;
pub use audit::*;
pub use statistics::*;
pub use ingestion::*;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("BSON serialization error: {0}")]
    Bson(#[from] bson::ser::Error),

    #[error("BSON deserialization error: {0}")]
    BsonDecode(#[from] bson::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source file not found: {0}")]
    SourceNotFound(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Invalid descriptor: missing {0}")]
    InvalidDescriptor(String),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Statistics unavailable: {0}")]
    StatisticsUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CatalogError {
    pub fn not_found(kind: EntityKind, id: impl std::fmt::Display) -> Self {
        CatalogError::NotFound(format!("{} {} not found", kind, id))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CatalogError::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
