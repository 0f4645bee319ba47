use std::path::Path;

use serde_json::Value;

use crate::handlers::read_source;
use crate::models::*;

/// Loads `.json` (an array of records or a single object) and `.jsonl`
/// (one object per line) sources.
pub struct JsonHandler;

impl JsonHandler {
    pub async fn load_json(path: &Path) -> Result<Vec<Value>> {
        let text = read_source(path).await?;
        let records = Self::parse_json(&text)?;
        tracing::debug!(path = %path.display(), record_count = records.len(), "Parsed JSON source");
        Ok(records)
    }

    pub async fn load_jsonl(path: &Path) -> Result<Vec<Value>> {
        let text = read_source(path).await?;
        let records = Self::parse_jsonl(&text)?;
        tracing::debug!(path = %path.display(), record_count = records.len(), "Parsed JSONL source");
        Ok(records)
    }

    pub fn parse_json(text: &str) -> Result<Vec<Value>> {
        match serde_json::from_str(text)? {
            Value::Array(items) => Ok(items),
            obj @ Value::Object(_) => Ok(vec![obj]),
            other => Err(CatalogError::Serialization(serde::de::Error::custom(format!(
                "expected an array or object of records, got {}",
                kind_of(&other)
            )))),
        }
    }

    pub fn parse_jsonl(text: &str) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let record: Value = serde_json::from_str(line)?;
            records.push(record);
        }
        Ok(records)
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
