use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{NormalizedDescriptor, VehicleDescriptor};

// letters of any script, decimal digits, whitespace and hyphen survive
static DISALLOWED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{Nd}\s-]").expect("static regex"));

/// Cleans one text field. Returns `None` when nothing is left.
pub fn normalize_text(raw: &str) -> Option<String> {
    let cleaned = DISALLOWED.replace_all(raw.trim(), "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Normalizes every field and checks the required ones. On failure returns
/// the names of the missing fields.
pub fn normalize_descriptor(raw: &VehicleDescriptor) -> Result<NormalizedDescriptor, Vec<&'static str>> {
    let field = |v: &Option<String>| v.as_deref().and_then(normalize_text);
    let brand = field(&raw.brand);
    let model = field(&raw.model);
    let body_type = field(&raw.body_type);

    match (brand, model, body_type) {
        (Some(brand), Some(model), Some(body_type)) => Ok(NormalizedDescriptor {
            brand,
            model,
            body_type,
            configuration: field(&raw.configuration),
        }),
        (brand, model, body_type) => {
            let mut missing = Vec::new();
            if brand.is_none() { missing.push("brand"); }
            if model.is_none() { missing.push("model"); }
            if body_type.is_none() { missing.push("body_type"); }
            Err(missing)
        }
    }
}
