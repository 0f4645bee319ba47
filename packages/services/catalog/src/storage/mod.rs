use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;

use crate::models::*;

pub mod memory;
pub mod mongo;

pub use memory::MemoryBackend;
pub use mongo::MongoBackend;

/// Persistence seam for the catalog. Implementations must enforce the
/// uniqueness rules themselves and report violations as
/// [`CatalogError::Conflict`]:
///
/// - brands, body types and configurations are unique by `name_key`
/// - car models are unique by `(brand_id, name_key)`
/// - cars are unique by `(model_id, body_type_id)` while `body_type_id` is set
///
/// The backend knows nothing about auditing; the catalog store wraps it.
#[async_trait]
pub trait CatalogBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn find_brand(&self, name_key: &str) -> Result<Option<Brand>>;
    async fn find_car_model(&self, brand_id: ObjectId, name_key: &str) -> Result<Option<CarModel>>;
    async fn find_body_type(&self, name_key: &str) -> Result<Option<BodyType>>;
    async fn find_configuration(&self, name_key: &str) -> Result<Option<Configuration>>;
    async fn find_car(&self, model_id: ObjectId, body_type_id: Option<ObjectId>) -> Result<Option<Car>>;

    async fn get(&self, kind: EntityKind, id: ObjectId) -> Result<Option<CatalogEntity>>;
    async fn list(&self, kind: EntityKind) -> Result<Vec<CatalogEntity>>;
    async fn car_models_of_brand(&self, brand_id: ObjectId) -> Result<Vec<CarModel>>;
    async fn find_cars(&self, filter: &CarFilter) -> Result<Vec<Car>>;

    /// Inserts a new row and returns its assigned id.
    async fn insert(&self, entity: &CatalogEntity) -> Result<ObjectId>;
    /// Replaces an existing row by id. Missing rows are `NotFound`.
    async fn replace(&self, entity: &CatalogEntity) -> Result<()>;
    /// Removes a single row. Returns whether anything was removed.
    async fn delete(&self, kind: EntityKind, id: ObjectId) -> Result<bool>;

    async fn count(&self, kind: EntityKind) -> Result<i64>;
    /// Car count per body type name, every body type included.
    async fn body_type_distribution(&self) -> Result<Vec<BodyTypeCount>>;
    /// Brands by descending car count, ties by ascending name key, at most `limit`.
    async fn top_brands(&self, limit: usize) -> Result<Vec<BrandRanking>>;

    async fn insert_snapshot(&self, snapshot: &StatisticsSnapshot) -> Result<ObjectId>;
    async fn latest_snapshot(&self) -> Result<Option<StatisticsSnapshot>>;

    async fn insert_audit(&self, record: &AuditRecord) -> Result<ObjectId>;
    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>>;
}
