#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;

use catalog_service::catalog::CatalogStore;
use catalog_service::models::*;
use catalog_service::storage::{CatalogBackend, MemoryBackend};

/// In-memory backend with switches that make individual operations fail.
#[derive(Default)]
pub struct FlakyBackend {
    pub inner: MemoryBackend,
    pub fail_audit: AtomicBool,
    pub fail_counts: AtomicBool,
    pub fail_distribution: AtomicBool,
    pub fail_top_brands: AtomicBool,
    pub fail_snapshots: AtomicBool,
}

impl FlakyBackend {
    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }

    /// Every metric group fails.
    pub fn break_statistics(&self, on: bool) {
        Self::set(&self.fail_counts, on);
        Self::set(&self.fail_distribution, on);
        Self::set(&self.fail_top_brands, on);
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(CatalogError::Storage(format!("injected {} failure", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogBackend for FlakyBackend {
    fn name(&self) -> &'static str { "flaky" }

    async fn find_brand(&self, name_key: &str) -> Result<Option<Brand>> { self.inner.find_brand(name_key).await }
    async fn find_car_model(&self, brand_id: ObjectId, name_key: &str) -> Result<Option<CarModel>> {
        self.inner.find_car_model(brand_id, name_key).await
    }
    async fn find_body_type(&self, name_key: &str) -> Result<Option<BodyType>> { self.inner.find_body_type(name_key).await }
    async fn find_configuration(&self, name_key: &str) -> Result<Option<Configuration>> {
        self.inner.find_configuration(name_key).await
    }
    async fn find_car(&self, model_id: ObjectId, body_type_id: Option<ObjectId>) -> Result<Option<Car>> {
        self.inner.find_car(model_id, body_type_id).await
    }
    async fn get(&self, kind: EntityKind, id: ObjectId) -> Result<Option<CatalogEntity>> { self.inner.get(kind, id).await }
    async fn list(&self, kind: EntityKind) -> Result<Vec<CatalogEntity>> { self.inner.list(kind).await }
    async fn car_models_of_brand(&self, brand_id: ObjectId) -> Result<Vec<CarModel>> {
        self.inner.car_models_of_brand(brand_id).await
    }
    async fn find_cars(&self, filter: &CarFilter) -> Result<Vec<Car>> { self.inner.find_cars(filter).await }
    async fn insert(&self, entity: &CatalogEntity) -> Result<ObjectId> { self.inner.insert(entity).await }
    async fn replace(&self, entity: &CatalogEntity) -> Result<()> { self.inner.replace(entity).await }
    async fn delete(&self, kind: EntityKind, id: ObjectId) -> Result<bool> { self.inner.delete(kind, id).await }

    async fn count(&self, kind: EntityKind) -> Result<i64> {
        Self::check(&self.fail_counts, "count")?;
        self.inner.count(kind).await
    }
    async fn body_type_distribution(&self) -> Result<Vec<BodyTypeCount>> {
        Self::check(&self.fail_distribution, "distribution")?;
        self.inner.body_type_distribution().await
    }
    async fn top_brands(&self, limit: usize) -> Result<Vec<BrandRanking>> {
        Self::check(&self.fail_top_brands, "top brands")?;
        self.inner.top_brands(limit).await
    }
    async fn insert_snapshot(&self, snapshot: &StatisticsSnapshot) -> Result<ObjectId> {
        Self::check(&self.fail_snapshots, "snapshot")?;
        self.inner.insert_snapshot(snapshot).await
    }
    async fn latest_snapshot(&self) -> Result<Option<StatisticsSnapshot>> { self.inner.latest_snapshot().await }
    async fn insert_audit(&self, record: &AuditRecord) -> Result<ObjectId> {
        Self::check(&self.fail_audit, "audit")?;
        self.inner.insert_audit(record).await
    }
    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> { self.inner.list_audit(filter).await }
}

pub fn memory_store() -> CatalogStore {
    CatalogStore::new(Arc::new(MemoryBackend::new()))
}

pub fn flaky_store() -> (Arc<FlakyBackend>, CatalogStore) {
    let backend = Arc::new(FlakyBackend::default());
    let store = CatalogStore::new(backend.clone());
    (backend, store)
}

pub fn actor(name: &str) -> ActorContext {
    ActorContext::user(name)
}

pub async fn audit(store: &CatalogStore, filter: AuditFilter) -> Vec<AuditRecord> {
    store.audit_log(&filter).await.unwrap()
}

pub async fn count(store: &CatalogStore, kind: EntityKind) -> i64 {
    store.backend().count(kind).await.unwrap()
}
