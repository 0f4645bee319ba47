use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A vehicle record as it arrives from a source, before cleaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleDescriptor {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub body_type: Option<String>,
    pub configuration: Option<String>,
}

const BRAND_KEYS: &[&str] = &["brand", "make", "mark"];
const MODEL_KEYS: &[&str] = &["model"];
const BODY_TYPE_KEYS: &[&str] = &["body_type", "bodytype", "bodyType", "body"];
const CONFIGURATION_KEYS: &[&str] = &["configuration", "config"];

impl VehicleDescriptor {
    pub fn new(brand: &str, model: &str, body_type: &str) -> Self {
        Self {
            brand: Some(brand.to_string()),
            model: Some(model.to_string()),
            body_type: Some(body_type.to_string()),
            configuration: None,
        }
    }

    /// Reads a descriptor out of a flat JSON object. Scalar values are
    /// stringified so `"model": 2107` is accepted; anything else is ignored.
    /// Returns `None` when the value is not an object.
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let pick = |keys: &[&str]| -> Option<String> {
            keys.iter().find_map(|k| match obj.get(*k) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                Some(Value::Bool(b)) => Some(b.to_string()),
                _ => None,
            })
        };
        Some(Self {
            brand: pick(BRAND_KEYS),
            model: pick(MODEL_KEYS),
            body_type: pick(BODY_TYPE_KEYS),
            configuration: pick(CONFIGURATION_KEYS),
        })
    }
}

/// A descriptor whose required fields survived normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDescriptor {
    pub brand: String,
    pub model: String,
    pub body_type: String,
    pub configuration: Option<String>,
}

/// Counters returned for one ingestion batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, async_graphql::SimpleObject)]
pub struct BatchReport {
    pub batch_id: String,
    pub source: Option<String>,
    pub total_records: i64,
    pub created_brands: i64,
    pub created_models: i64,
    pub created_body_types: i64,
    pub created_configurations: i64,
    pub cars_processed: i64,
    pub skipped: i64,
    pub invalid_entries: i64,
    pub errors: i64,
    pub duration_ms: i64,
}
