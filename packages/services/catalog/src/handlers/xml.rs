use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::handlers::read_source;
use crate::models::*;

/// Reads repeated record elements (`<car>` by default) into flat JSON
/// objects keyed by child element name. Attributes on the record element
/// become fields too.
pub struct XmlHandler {
    record_element: String,
}

impl XmlHandler {
    pub fn new() -> Self { Self::with_config(None) }

    pub fn with_config(cfg: Option<&Config>) -> Self {
        let record_element = cfg
            .map(|c| c.xml_record_element.clone())
            .unwrap_or_else(|| "car".to_string());
        Self { record_element }
    }

    pub async fn load_file(&self, path: &Path) -> Result<Vec<Value>> {
        let content = read_source(path).await?;
        let records = self.parse_xml(&content)?;
        tracing::debug!(
            path = %path.display(),
            record_element = %self.record_element,
            record_count = records.len(),
            "Parsed XML source"
        );
        Ok(records)
    }

    pub fn parse_xml(&self, xml_content: &str) -> Result<Vec<Value>> {
        let mut reader = Reader::from_str(xml_content);
        reader.trim_text(true);
        let mut records = Vec::new();
        let mut current_record: Option<Map<String, Value>> = None;
        let mut current_element = String::new();
        let mut current_text = String::new();
        let mut depth = 0usize;
        let mut saw_root = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    depth += 1;
                    saw_root = true;
                    let name = element_name(e)?;
                    if name == self.record_element {
                        current_record = Some(record_attributes(e)?);
                    }
                    current_element = name;
                    current_text.clear();
                }
                Ok(Event::Empty(ref e)) => {
                    saw_root = true;
                    if element_name(e)? == self.record_element {
                        records.push(Value::Object(record_attributes(e)?));
                    }
                }
                Ok(Event::End(ref e)) => {
                    depth = depth.saturating_sub(1);
                    let name = std::str::from_utf8(e.name().as_ref())
                        .map_err(|e| CatalogError::XmlParsing(e.to_string()))?
                        .to_string();

                    if name == self.record_element {
                        if let Some(record) = current_record.take() {
                            records.push(Value::Object(record));
                        }
                    } else if let Some(ref mut record) = current_record {
                        let text = current_text.trim();
                        if !text.is_empty() && name == current_element {
                            record.insert(name, Value::String(text.to_string()));
                        }
                    }
                    current_text.clear();
                }
                Ok(Event::Text(e)) => {
                    let text = e.unescape().map_err(|e| CatalogError::XmlParsing(e.to_string()))?;
                    current_text.push_str(&text);
                }
                Ok(Event::CData(e)) => {
                    let text = std::str::from_utf8(&e)
                        .map_err(|e| CatalogError::XmlParsing(e.to_string()))?;
                    current_text.push_str(text);
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(CatalogError::XmlParsing(format!(
                        "error at position {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
                _ => {}
            }
        }

        if !saw_root {
            return Err(CatalogError::XmlParsing("document has no root element".to_string()));
        }
        if depth > 0 {
            return Err(CatalogError::XmlParsing("unexpected end of document; unclosed elements".to_string()));
        }
        Ok(records)
    }
}

impl Default for XmlHandler {
    fn default() -> Self { Self::new() }
}

fn element_name(e: &BytesStart<'_>) -> Result<String> {
    std::str::from_utf8(e.name().as_ref())
        .map(str::to_string)
        .map_err(|e| CatalogError::XmlParsing(e.to_string()))
}

fn record_attributes(e: &BytesStart<'_>) -> Result<Map<String, Value>> {
    let mut record = Map::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| CatalogError::XmlParsing(e.to_string()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| CatalogError::XmlParsing(e.to_string()))?
            .to_string();
        let value = attr.unescape_value().map_err(|e| CatalogError::XmlParsing(e.to_string()))?;
        record.insert(key, Value::String(value.into_owned()));
    }
    Ok(record)
}
