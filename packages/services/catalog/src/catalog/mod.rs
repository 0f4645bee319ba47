use std::future::Future;
use std::sync::Arc;

use mongodb::bson::oid::ObjectId;

use crate::audit::{AuditRecorder, MutationObserver};
use crate::ingestion::normalize_text;
use crate::models::*;
use crate::storage::CatalogBackend;

/// Result of a get-or-create.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted<T> {
    pub value: T,
    pub created: bool,
}

impl<T> Upserted<T> {
    fn created(value: T) -> Self { Self { value, created: true } }
    fn existing(value: T) -> Self { Self { value, created: false } }
}

/// Mutation surface of the catalog. Every write goes through here so the
/// observer sees it: creates after the row has an id, updates with the
/// previously persisted state, deletes before the row is removed.
#[derive(Clone)]
pub struct CatalogStore {
    backend: Arc<dyn CatalogBackend>,
    observer: Arc<dyn MutationObserver>,
}

impl CatalogStore {
    /// Store audited by an [`AuditRecorder`] writing to the same backend.
    pub fn new(backend: Arc<dyn CatalogBackend>) -> Self {
        let observer = Arc::new(AuditRecorder::new(backend.clone()));
        Self { backend, observer }
    }

    pub fn with_observer(backend: Arc<dyn CatalogBackend>, observer: Arc<dyn MutationObserver>) -> Self {
        Self { backend, observer }
    }

    pub fn backend(&self) -> &Arc<dyn CatalogBackend> {
        &self.backend
    }

    // Reads

    pub async fn get<T>(&self, kind: EntityKind, id: ObjectId) -> Result<T>
    where
        T: TryFrom<CatalogEntity, Error = CatalogError>,
    {
        self.backend
            .get(kind, id)
            .await?
            .ok_or_else(|| CatalogError::not_found(kind, id))?
            .try_into()
    }

    pub async fn list<T>(&self, kind: EntityKind) -> Result<Vec<T>>
    where
        T: TryFrom<CatalogEntity, Error = CatalogError>,
    {
        self.backend.list(kind).await?.into_iter().map(T::try_from).collect()
    }

    pub async fn latest_snapshot(&self) -> Result<Option<StatisticsSnapshot>> {
        self.backend.latest_snapshot().await
    }

    pub async fn audit_log(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        self.backend.list_audit(filter).await
    }

    // Get-or-create

    pub async fn get_or_create_brand(&self, actor: &ActorContext, name: &str) -> Result<Upserted<Brand>> {
        let key = name_key(name);
        let key = key.as_str();
        self.get_or_insert(actor, Brand::new(name), || self.backend.find_brand(key)).await
    }

    pub async fn get_or_create_car_model(
        &self,
        actor: &ActorContext,
        brand_id: ObjectId,
        name: &str,
    ) -> Result<Upserted<CarModel>> {
        let key = name_key(name);
        let key = key.as_str();
        self.get_or_insert(actor, CarModel::new(brand_id, name), || self.backend.find_car_model(brand_id, key))
            .await
    }

    pub async fn get_or_create_body_type(&self, actor: &ActorContext, name: &str) -> Result<Upserted<BodyType>> {
        let key = name_key(name);
        let key = key.as_str();
        self.get_or_insert(actor, BodyType::new(name), || self.backend.find_body_type(key)).await
    }

    pub async fn get_or_create_configuration(
        &self,
        actor: &ActorContext,
        name: &str,
    ) -> Result<Upserted<Configuration>> {
        let key = name_key(name);
        let key = key.as_str();
        self.get_or_insert(actor, Configuration::new(name), || self.backend.find_configuration(key))
            .await
    }

    /// Creates the car unless one with the same `(model, body_type)` exists.
    /// An existing car is returned untouched.
    pub async fn get_or_create_car(
        &self,
        actor: &ActorContext,
        model_id: ObjectId,
        body_type_id: Option<ObjectId>,
        configuration_ids: Vec<ObjectId>,
    ) -> Result<Upserted<Car>> {
        let fresh = Car::new(model_id, body_type_id, configuration_ids);
        self.get_or_insert(actor, fresh, || self.backend.find_car(model_id, body_type_id)).await
    }

    /// Check, then insert; a unique-constraint conflict means a concurrent
    /// writer got there first, so the row is fetched again.
    async fn get_or_insert<T, F, Fut>(&self, actor: &ActorContext, fresh: T, lookup: F) -> Result<Upserted<T>>
    where
        T: Into<CatalogEntity> + TryFrom<CatalogEntity, Error = CatalogError>,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        if let Some(existing) = lookup().await? {
            return Ok(Upserted::existing(existing));
        }
        match self.insert_row(actor, fresh.into()).await {
            Ok(row) => Ok(Upserted::created(row.try_into()?)),
            Err(e) if e.is_conflict() => match lookup().await? {
                Some(existing) => {
                    tracing::debug!(error = %e, "Insert lost a race; using the concurrently created row");
                    Ok(Upserted::existing(existing))
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn insert_row(&self, actor: &ActorContext, mut row: CatalogEntity) -> Result<CatalogEntity> {
        let id = self.backend.insert(&row).await?;
        row.set_id(id);
        tracing::debug!(entity_type = %row.kind(), entity_id = %id, "Catalog row created");
        self.observer.created(actor, &row).await;
        Ok(row)
    }

    // Updates

    pub async fn rename_brand(&self, actor: &ActorContext, id: ObjectId, name: &str) -> Result<Brand> {
        let name = required_name(name)?;
        let before: Brand = self.get(EntityKind::Brand, id).await?;
        let after = Brand { name_key: name_key(&name), name, ..before.clone() };
        self.apply_update(actor, before.into(), after.into()).await?.try_into()
    }

    pub async fn rename_car_model(&self, actor: &ActorContext, id: ObjectId, name: &str) -> Result<CarModel> {
        let name = required_name(name)?;
        let before: CarModel = self.get(EntityKind::CarModel, id).await?;
        let after = CarModel { name_key: name_key(&name), name, ..before.clone() };
        self.apply_update(actor, before.into(), after.into()).await?.try_into()
    }

    pub async fn rename_body_type(&self, actor: &ActorContext, id: ObjectId, name: &str) -> Result<BodyType> {
        let name = required_name(name)?;
        let before: BodyType = self.get(EntityKind::BodyType, id).await?;
        let after = BodyType { name_key: name_key(&name), name, ..before.clone() };
        self.apply_update(actor, before.into(), after.into()).await?.try_into()
    }

    pub async fn rename_configuration(
        &self,
        actor: &ActorContext,
        id: ObjectId,
        name: &str,
    ) -> Result<Configuration> {
        let name = required_name(name)?;
        let before: Configuration = self.get(EntityKind::Configuration, id).await?;
        let after = Configuration { name_key: name_key(&name), name, ..before.clone() };
        self.apply_update(actor, before.into(), after.into()).await?.try_into()
    }

    pub async fn set_car_body_type(
        &self,
        actor: &ActorContext,
        id: ObjectId,
        body_type_id: Option<ObjectId>,
    ) -> Result<Car> {
        if let Some(bt) = body_type_id {
            let _: BodyType = self.get(EntityKind::BodyType, bt).await?;
        }
        let before: Car = self.get(EntityKind::Car, id).await?;
        let after = Car { body_type_id, ..before.clone() };
        self.apply_update(actor, before.into(), after.into()).await?.try_into()
    }

    pub async fn link_configuration(&self, actor: &ActorContext, car_id: ObjectId, configuration_id: ObjectId) -> Result<Car> {
        let _: Configuration = self.get(EntityKind::Configuration, configuration_id).await?;
        let before: Car = self.get(EntityKind::Car, car_id).await?;
        if before.configuration_ids.contains(&configuration_id) {
            return Ok(before);
        }
        let mut after = before.clone();
        after.configuration_ids.push(configuration_id);
        self.apply_update(actor, before.into(), after.into()).await?.try_into()
    }

    async fn apply_update(
        &self,
        actor: &ActorContext,
        before: CatalogEntity,
        after: CatalogEntity,
    ) -> Result<CatalogEntity> {
        self.backend.replace(&after).await?;
        self.observer.updated(actor, &before, &after).await;
        Ok(after)
    }

    // Deletes. Brand -> models -> cars cascade; body types and
    // configurations are detached from their cars first.

    pub async fn delete_car(&self, actor: &ActorContext, id: ObjectId) -> Result<bool> {
        match self.backend.get(EntityKind::Car, id).await? {
            Some(row) => self.remove(actor, row).await,
            None => Ok(false),
        }
    }

    pub async fn delete_car_model(&self, actor: &ActorContext, id: ObjectId) -> Result<bool> {
        let Some(row) = self.backend.get(EntityKind::CarModel, id).await? else {
            return Ok(false);
        };
        let cars = self.backend.find_cars(&CarFilter { model_id: Some(id), ..Default::default() }).await?;
        for car in cars {
            self.remove(actor, car.into()).await?;
        }
        self.remove(actor, row).await
    }

    pub async fn delete_brand(&self, actor: &ActorContext, id: ObjectId) -> Result<bool> {
        let Some(row) = self.backend.get(EntityKind::Brand, id).await? else {
            return Ok(false);
        };
        for model in self.backend.car_models_of_brand(id).await? {
            if let Some(model_id) = model.id {
                self.delete_car_model(actor, model_id).await?;
            }
        }
        self.remove(actor, row).await
    }

    pub async fn delete_body_type(&self, actor: &ActorContext, id: ObjectId) -> Result<bool> {
        let Some(row) = self.backend.get(EntityKind::BodyType, id).await? else {
            return Ok(false);
        };
        let cars = self.backend.find_cars(&CarFilter { body_type_id: Some(id), ..Default::default() }).await?;
        for car in cars {
            let detached = Car { body_type_id: None, ..car.clone() };
            self.apply_update(actor, car.into(), detached.into()).await?;
        }
        self.remove(actor, row).await
    }

    pub async fn delete_configuration(&self, actor: &ActorContext, id: ObjectId) -> Result<bool> {
        let Some(row) = self.backend.get(EntityKind::Configuration, id).await? else {
            return Ok(false);
        };
        let cars = self
            .backend
            .find_cars(&CarFilter { configuration_id: Some(id), ..Default::default() })
            .await?;
        for car in cars {
            let mut unlinked = car.clone();
            unlinked.configuration_ids.retain(|c| *c != id);
            self.apply_update(actor, car.into(), unlinked.into()).await?;
        }
        self.remove(actor, row).await
    }

    async fn remove(&self, actor: &ActorContext, row: CatalogEntity) -> Result<bool> {
        let kind = row.kind();
        let id = row
            .id()
            .ok_or_else(|| CatalogError::Storage(format!("cannot delete {} without id", kind)))?;
        self.observer.deleting(actor, &row).await;
        let removed = self.backend.delete(kind, id).await?;
        tracing::debug!(entity_type = %kind, entity_id = %id, removed, "Catalog row deleted");
        Ok(removed)
    }

    // Statistics snapshots

    pub async fn persist_snapshot(&self, actor: &ActorContext, report: StatisticsReport) -> Result<StatisticsSnapshot> {
        let mut snapshot = StatisticsSnapshot::new(report);
        let id = self.backend.insert_snapshot(&snapshot).await?;
        snapshot.id = Some(id);
        self.observer.created(actor, &snapshot).await;
        Ok(snapshot)
    }
}

/// Renames go through the same cleaning as ingestion so the stored key
/// matches what a later ingest of the same text looks up.
fn required_name(name: &str) -> Result<String> {
    normalize_text(name).ok_or_else(|| CatalogError::InvalidDescriptor("name".to_string()))
}
