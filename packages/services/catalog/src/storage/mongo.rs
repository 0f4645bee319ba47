use async_trait::async_trait;
use futures::stream::{StreamExt, TryStreamExt};
use mongodb::bson::{self, doc, oid::ObjectId, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, FindOneOptions, FindOptions};
use mongodb::{Client as MongoClient, Collection, Database};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Config;
use crate::models::*;
use crate::storage::CatalogBackend;

pub const AUDIT_COLLECTION: &str = "audit_log";

/// MongoDB backend. Uniqueness comes from the indexes created by the
/// catalog migrations; duplicate-key errors surface as `Conflict`.
#[derive(Clone)]
pub struct MongoBackend {
    pub(crate) db: Database,
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == 11000,
        _ => {
            let msg = err.to_string();
            msg.contains("E11000") || msg.to_lowercase().contains("duplicate key")
        }
    }
}

fn write_error(err: mongodb::error::Error, what: impl FnOnce() -> String) -> CatalogError {
    if is_duplicate_key(&err) {
        CatalogError::Conflict(what())
    } else {
        CatalogError::Database(err)
    }
}

/// Some deployments reject retryable writes; when they are switched off the
/// URI must say so explicitly.
fn effective_uri(uri: &str, retry_writes: bool) -> String {
    let mut effective = uri.to_string();
    if retry_writes {
        return effective;
    }
    if effective.contains("retryWrites=") {
        effective = effective
            .replace("retryWrites=true", "retryWrites=false")
            .replace("retryWrites=1", "retryWrites=false");
    } else if effective.contains('?') {
        effective.push_str("&retryWrites=false");
    } else {
        effective.push_str("?retryWrites=false");
    }
    effective
}

impl MongoBackend {
    pub fn with_db(db: Database) -> Self { Self { db } }

    pub async fn connect(cfg: &Config) -> Result<Self> {
        let mut client_options = ClientOptions::parse(effective_uri(&cfg.mongodb_uri, cfg.mongodb_retry_writes)).await?;
        client_options.retry_writes = Some(cfg.mongodb_retry_writes);
        client_options.app_name = Some("catalog-service".to_string());
        let client = MongoClient::with_options(client_options)?;
        tracing::info!(database = %cfg.database_name, "Connected MongoDB client");
        Ok(Self::with_db(client.database(&cfg.database_name)))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn collection<T>(&self, kind: EntityKind) -> Collection<T> {
        self.db.collection(kind.collection())
    }

    async fn find_one_typed<T>(&self, kind: EntityKind, filter: Document) -> Result<Option<T>>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        self.collection::<T>(kind).find_one(filter, None).await.map_err(Into::into)
    }

    async fn find_all_typed<T>(&self, kind: EntityKind, filter: Document) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let cursor = self.collection::<T>(kind).find(filter, options).await?;
        cursor.try_collect().await.map_err(Into::into)
    }

    async fn insert_typed<T>(&self, kind: EntityKind, row: &T) -> Result<ObjectId>
    where
        T: Serialize + Send + Sync,
    {
        let result = self
            .collection::<T>(kind)
            .insert_one(row, None)
            .await
            .map_err(|e| write_error(e, || format!("{} already exists", kind)))?;
        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| CatalogError::Storage(format!("{} insert returned a non-ObjectId id", kind)))
    }

    async fn replace_typed<T>(&self, kind: EntityKind, id: ObjectId, row: &T) -> Result<()>
    where
        T: Serialize + Send + Sync,
    {
        let result = self
            .collection::<T>(kind)
            .replace_one(doc! { "_id": id }, row, None)
            .await
            .map_err(|e| write_error(e, || format!("{} {} collides with an existing row", kind, id)))?;
        if result.matched_count == 0 {
            return Err(CatalogError::not_found(kind, id));
        }
        Ok(())
    }

    async fn aggregate_rows<T>(&self, kind: EntityKind, pipeline: Vec<Document>) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let mut cursor = self
            .collection::<Document>(kind)
            .aggregate(pipeline, None)
            .await?;
        let mut rows = Vec::new();
        while let Some(doc) = cursor.next().await {
            rows.push(bson::from_document(doc?)?);
        }
        Ok(rows)
    }
}

#[async_trait]
impl CatalogBackend for MongoBackend {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    async fn find_brand(&self, name_key: &str) -> Result<Option<Brand>> {
        self.find_one_typed(EntityKind::Brand, doc! { "name_key": name_key }).await
    }

    async fn find_car_model(&self, brand_id: ObjectId, name_key: &str) -> Result<Option<CarModel>> {
        self.find_one_typed(EntityKind::CarModel, doc! { "brand_id": brand_id, "name_key": name_key })
            .await
    }

    async fn find_body_type(&self, name_key: &str) -> Result<Option<BodyType>> {
        self.find_one_typed(EntityKind::BodyType, doc! { "name_key": name_key }).await
    }

    async fn find_configuration(&self, name_key: &str) -> Result<Option<Configuration>> {
        self.find_one_typed(EntityKind::Configuration, doc! { "name_key": name_key }).await
    }

    async fn find_car(&self, model_id: ObjectId, body_type_id: Option<ObjectId>) -> Result<Option<Car>> {
        self.find_one_typed(EntityKind::Car, doc! { "model_id": model_id, "body_type_id": body_type_id })
            .await
    }

    async fn get(&self, kind: EntityKind, id: ObjectId) -> Result<Option<CatalogEntity>> {
        let filter = doc! { "_id": id };
        Ok(match kind {
            EntityKind::Brand => self.find_one_typed::<Brand>(kind, filter).await?.map(Into::into),
            EntityKind::CarModel => self.find_one_typed::<CarModel>(kind, filter).await?.map(Into::into),
            EntityKind::BodyType => self.find_one_typed::<BodyType>(kind, filter).await?.map(Into::into),
            EntityKind::Configuration => {
                self.find_one_typed::<Configuration>(kind, filter).await?.map(Into::into)
            }
            EntityKind::Car => self.find_one_typed::<Car>(kind, filter).await?.map(Into::into),
            EntityKind::Statistic => {
                return Err(CatalogError::Storage("snapshots are read through latest_snapshot".to_string()))
            }
        })
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<CatalogEntity>> {
        let all = doc! {};
        Ok(match kind {
            EntityKind::Brand => into_entities(self.find_all_typed::<Brand>(kind, all).await?),
            EntityKind::CarModel => into_entities(self.find_all_typed::<CarModel>(kind, all).await?),
            EntityKind::BodyType => into_entities(self.find_all_typed::<BodyType>(kind, all).await?),
            EntityKind::Configuration => into_entities(self.find_all_typed::<Configuration>(kind, all).await?),
            EntityKind::Car => into_entities(self.find_all_typed::<Car>(kind, all).await?),
            EntityKind::Statistic => {
                return Err(CatalogError::Storage("snapshots are read through latest_snapshot".to_string()))
            }
        })
    }

    async fn car_models_of_brand(&self, brand_id: ObjectId) -> Result<Vec<CarModel>> {
        self.find_all_typed(EntityKind::CarModel, doc! { "brand_id": brand_id }).await
    }

    async fn find_cars(&self, filter: &CarFilter) -> Result<Vec<Car>> {
        let mut query = Document::new();
        if let Some(model_id) = filter.model_id {
            query.insert("model_id", model_id);
        }
        if let Some(body_type_id) = filter.body_type_id {
            query.insert("body_type_id", body_type_id);
        }
        if let Some(configuration_id) = filter.configuration_id {
            query.insert("configuration_ids", configuration_id);
        }
        self.find_all_typed(EntityKind::Car, query).await
    }

    async fn insert(&self, entity: &CatalogEntity) -> Result<ObjectId> {
        let kind = entity.kind();
        match entity {
            CatalogEntity::Brand(e) => self.insert_typed(kind, e).await,
            CatalogEntity::CarModel(e) => self.insert_typed(kind, e).await,
            CatalogEntity::BodyType(e) => self.insert_typed(kind, e).await,
            CatalogEntity::Configuration(e) => self.insert_typed(kind, e).await,
            CatalogEntity::Car(e) => self.insert_typed(kind, e).await,
        }
    }

    async fn replace(&self, entity: &CatalogEntity) -> Result<()> {
        let kind = entity.kind();
        let id = entity
            .id()
            .ok_or_else(|| CatalogError::Storage(format!("cannot replace {} without id", kind)))?;
        match entity {
            CatalogEntity::Brand(e) => self.replace_typed(kind, id, e).await,
            CatalogEntity::CarModel(e) => self.replace_typed(kind, id, e).await,
            CatalogEntity::BodyType(e) => self.replace_typed(kind, id, e).await,
            CatalogEntity::Configuration(e) => self.replace_typed(kind, id, e).await,
            CatalogEntity::Car(e) => self.replace_typed(kind, id, e).await,
        }
    }

    async fn delete(&self, kind: EntityKind, id: ObjectId) -> Result<bool> {
        let result = self
            .collection::<Document>(kind)
            .delete_one(doc! { "_id": id }, None)
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn count(&self, kind: EntityKind) -> Result<i64> {
        let n = self.collection::<Document>(kind).count_documents(doc! {}, None).await?;
        Ok(n as i64)
    }

    async fn body_type_distribution(&self) -> Result<Vec<BodyTypeCount>> {
        let pipeline = vec![
            doc! { "$lookup": {
                "from": EntityKind::Car.collection(),
                "localField": "_id",
                "foreignField": "body_type_id",
                "as": "cars",
            }},
            doc! { "$project": { "_id": 0, "name": 1, "name_key": 1, "car_count": { "$size": "$cars" } } },
            doc! { "$sort": { "name_key": 1 } },
        ];
        self.aggregate_rows(EntityKind::BodyType, pipeline).await
    }

    async fn top_brands(&self, limit: usize) -> Result<Vec<BrandRanking>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let pipeline = vec![
            doc! { "$lookup": {
                "from": EntityKind::CarModel.collection(),
                "localField": "_id",
                "foreignField": "brand_id",
                "as": "models",
            }},
            doc! { "$lookup": {
                "from": EntityKind::Car.collection(),
                "localField": "models._id",
                "foreignField": "model_id",
                "as": "cars",
            }},
            doc! { "$project": { "_id": 0, "brand": "$name", "name_key": 1, "car_count": { "$size": "$cars" } } },
            doc! { "$sort": { "car_count": -1, "name_key": 1, "brand": 1 } },
            doc! { "$limit": limit as i64 },
        ];
        self.aggregate_rows(EntityKind::Brand, pipeline).await
    }

    async fn insert_snapshot(&self, snapshot: &StatisticsSnapshot) -> Result<ObjectId> {
        self.insert_typed(EntityKind::Statistic, snapshot).await
    }

    async fn latest_snapshot(&self) -> Result<Option<StatisticsSnapshot>> {
        let options = FindOneOptions::builder()
            .sort(doc! { "created_at": -1, "_id": -1 })
            .build();
        self.collection::<StatisticsSnapshot>(EntityKind::Statistic)
            .find_one(doc! {}, options)
            .await
            .map_err(Into::into)
    }

    async fn insert_audit(&self, record: &AuditRecord) -> Result<ObjectId> {
        let result = self
            .db
            .collection::<AuditRecord>(AUDIT_COLLECTION)
            .insert_one(record, None)
            .await?;
        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| CatalogError::Storage("audit insert returned a non-ObjectId id".to_string()))
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        // the driver reads a zero limit as unlimited
        if filter.limit == Some(0) {
            return Ok(Vec::new());
        }
        let mut query = Document::new();
        if let Some(kind) = filter.entity_type {
            query.insert("entity_type", bson::to_bson(&kind)?);
        }
        if let Some(action) = filter.action {
            query.insert("action", bson::to_bson(&action)?);
        }
        if let Some(entity_id) = filter.entity_id {
            query.insert("entity_id", entity_id);
        }
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": -1, "_id": -1 })
            .limit(filter.limit.map(|l| l as i64))
            .build();
        let cursor = self
            .db
            .collection::<AuditRecord>(AUDIT_COLLECTION)
            .find(query, options)
            .await?;
        cursor.try_collect().await.map_err(Into::into)
    }
}

fn into_entities<T: Into<CatalogEntity>>(rows: Vec<T>) -> Vec<CatalogEntity> {
    rows.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_writes_is_forced_off() {
        assert_eq!(effective_uri("mongodb://h:27017", false), "mongodb://h:27017?retryWrites=false");
        assert_eq!(
            effective_uri("mongodb://h/?retryWrites=true&w=1", false),
            "mongodb://h/?retryWrites=false&w=1"
        );
        assert_eq!(effective_uri("mongodb://h", true), "mongodb://h");
    }
}
