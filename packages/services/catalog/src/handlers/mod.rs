pub mod json;
pub mod xml;

pub use json::*;
pub use xml::*;

use std::path::Path;

use serde_json::Value;

use crate::config::Config;
use crate::models::*;

/// Source file format, picked from the extension. Anything unknown is
/// treated as XML, the catalog's native export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Xml,
    Json,
    JsonLines,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => SourceFormat::Json,
            Some("jsonl") | Some("ndjson") => SourceFormat::JsonLines,
            _ => SourceFormat::Xml,
        }
    }
}

pub(crate) async fn read_source(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(CatalogError::SourceNotFound(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Reads every raw record from a source file.
pub async fn load_source(path: &Path, cfg: Option<&Config>) -> Result<Vec<Value>> {
    match SourceFormat::from_path(path) {
        SourceFormat::Xml => XmlHandler::with_config(cfg).load_file(path).await,
        SourceFormat::Json => JsonHandler::load_json(path).await,
        SourceFormat::JsonLines => JsonHandler::load_jsonl(path).await,
    }
}
