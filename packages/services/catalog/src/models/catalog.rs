use std::collections::BTreeMap;
use std::fmt;

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Kinds of rows the catalog knows about. Only some of them are audited,
/// see [`EntityKind::is_tracked`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, async_graphql::Enum)]
pub enum EntityKind {
    Brand,
    CarModel,
    BodyType,
    Configuration,
    Car,
    Statistic,
}

impl EntityKind {
    /// Tracked kinds get an audit record for every create, update and delete.
    /// Configuration is a plain lookup table and the audit log never audits itself.
    pub fn is_tracked(self) -> bool {
        !matches!(self, EntityKind::Configuration)
    }

    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Brand => "brands",
            EntityKind::CarModel => "car_models",
            EntityKind::BodyType => "body_types",
            EntityKind::Configuration => "configurations",
            EntityKind::Car => "cars",
            EntityKind::Statistic => "statistics",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Brand => "Brand",
            EntityKind::CarModel => "CarModel",
            EntityKind::BodyType => "BodyType",
            EntityKind::Configuration => "Configuration",
            EntityKind::Car => "Car",
            EntityKind::Statistic => "Statistic",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup key used by every uniqueness constraint on names.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn render_ref(id: Option<ObjectId>) -> String {
    id.map(|id| id.to_hex()).unwrap_or_else(|| "null".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brand {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub name_key: String,
}

impl Brand {
    pub fn new(name: &str) -> Self {
        Self { id: None, name: name.to_string(), name_key: name_key(name) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarModel {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub brand_id: ObjectId,
    pub name: String,
    pub name_key: String,
}

impl CarModel {
    pub fn new(brand_id: ObjectId, name: &str) -> Self {
        Self { id: None, brand_id, name: name.to_string(), name_key: name_key(name) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyType {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub name_key: String,
}

impl BodyType {
    pub fn new(name: &str) -> Self {
        Self { id: None, name: name.to_string(), name_key: name_key(name) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub name_key: String,
}

impl Configuration {
    pub fn new(name: &str) -> Self {
        Self { id: None, name: name.to_string(), name_key: name_key(name) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Car {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub model_id: ObjectId,
    pub body_type_id: Option<ObjectId>,
    #[serde(default)]
    pub configuration_ids: Vec<ObjectId>,
}

impl Car {
    pub fn new(model_id: ObjectId, body_type_id: Option<ObjectId>, configuration_ids: Vec<ObjectId>) -> Self {
        Self { id: None, model_id, body_type_id, configuration_ids }
    }
}

/// Anything the audit recorder can describe: its kind, identity and the
/// textual form of every persisted field.
pub trait AuditSubject: Send + Sync {
    fn kind(&self) -> EntityKind;
    fn entity_id(&self) -> Option<ObjectId>;
    fn audit_fields(&self) -> BTreeMap<&'static str, String>;
}

impl AuditSubject for Brand {
    fn kind(&self) -> EntityKind { EntityKind::Brand }
    fn entity_id(&self) -> Option<ObjectId> { self.id }
    fn audit_fields(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([("id", render_ref(self.id)), ("name", self.name.clone())])
    }
}

impl AuditSubject for CarModel {
    fn kind(&self) -> EntityKind { EntityKind::CarModel }
    fn entity_id(&self) -> Option<ObjectId> { self.id }
    fn audit_fields(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("id", render_ref(self.id)),
            ("brand", self.brand_id.to_hex()),
            ("name", self.name.clone()),
        ])
    }
}

impl AuditSubject for BodyType {
    fn kind(&self) -> EntityKind { EntityKind::BodyType }
    fn entity_id(&self) -> Option<ObjectId> { self.id }
    fn audit_fields(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([("id", render_ref(self.id)), ("name", self.name.clone())])
    }
}

impl AuditSubject for Configuration {
    fn kind(&self) -> EntityKind { EntityKind::Configuration }
    fn entity_id(&self) -> Option<ObjectId> { self.id }
    fn audit_fields(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([("id", render_ref(self.id)), ("name", self.name.clone())])
    }
}

impl AuditSubject for Car {
    fn kind(&self) -> EntityKind { EntityKind::Car }
    fn entity_id(&self) -> Option<ObjectId> { self.id }
    // configuration links are a relation, not a field of the row
    fn audit_fields(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("id", render_ref(self.id)),
            ("model", self.model_id.to_hex()),
            ("body_type", render_ref(self.body_type_id)),
        ])
    }
}

/// A row of any catalog table, used where the storage layer is addressed by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEntity {
    Brand(Brand),
    CarModel(CarModel),
    BodyType(BodyType),
    Configuration(Configuration),
    Car(Car),
}

impl CatalogEntity {
    pub fn id(&self) -> Option<ObjectId> {
        match self {
            CatalogEntity::Brand(e) => e.id,
            CatalogEntity::CarModel(e) => e.id,
            CatalogEntity::BodyType(e) => e.id,
            CatalogEntity::Configuration(e) => e.id,
            CatalogEntity::Car(e) => e.id,
        }
    }

    pub fn set_id(&mut self, id: ObjectId) {
        match self {
            CatalogEntity::Brand(e) => e.id = Some(id),
            CatalogEntity::CarModel(e) => e.id = Some(id),
            CatalogEntity::BodyType(e) => e.id = Some(id),
            CatalogEntity::Configuration(e) => e.id = Some(id),
            CatalogEntity::Car(e) => e.id = Some(id),
        }
    }

    fn subject(&self) -> &dyn AuditSubject {
        match self {
            CatalogEntity::Brand(e) => e,
            CatalogEntity::CarModel(e) => e,
            CatalogEntity::BodyType(e) => e,
            CatalogEntity::Configuration(e) => e,
            CatalogEntity::Car(e) => e,
        }
    }
}

impl AuditSubject for CatalogEntity {
    fn kind(&self) -> EntityKind { self.subject().kind() }
    fn entity_id(&self) -> Option<ObjectId> { self.id() }
    fn audit_fields(&self) -> BTreeMap<&'static str, String> { self.subject().audit_fields() }
}

macro_rules! entity_conversions {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for CatalogEntity {
                fn from(value: $variant) -> Self { CatalogEntity::$variant(value) }
            }

            impl TryFrom<CatalogEntity> for $variant {
                type Error = crate::models::CatalogError;

                fn try_from(value: CatalogEntity) -> Result<Self, Self::Error> {
                    match value {
                        CatalogEntity::$variant(inner) => Ok(inner),
                        other => Err(crate::models::CatalogError::Storage(format!(
                            "expected {} row, got {}",
                            stringify!($variant),
                            other.kind()
                        ))),
                    }
                }
            }
        )*
    };
}

entity_conversions!(Brand, CarModel, BodyType, Configuration, Car);

/// Filter for car lookups by relation. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct CarFilter {
    pub model_id: Option<ObjectId>,
    pub body_type_id: Option<ObjectId>,
    pub configuration_id: Option<ObjectId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_key_is_case_insensitive() {
        assert_eq!(name_key("  Toyota "), "toyota");
        assert_eq!(name_key("ЛАДА"), "лада");
    }

    #[test]
    fn car_fields_skip_configuration_links() {
        let mut car = Car::new(ObjectId::new(), None, vec![ObjectId::new()]);
        car.id = Some(ObjectId::new());
        let fields = car.audit_fields();
        assert_eq!(fields.get("body_type").map(String::as_str), Some("null"));
        assert!(!fields.contains_key("configurations"));
        assert_eq!(fields.len(), 3);
    }
}
