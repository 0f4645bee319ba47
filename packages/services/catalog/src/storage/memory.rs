use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;

use crate::models::*;
use crate::storage::CatalogBackend;

#[derive(Default)]
struct MemoryState {
    brands: BTreeMap<ObjectId, Brand>,
    car_models: BTreeMap<ObjectId, CarModel>,
    body_types: BTreeMap<ObjectId, BodyType>,
    configurations: BTreeMap<ObjectId, Configuration>,
    cars: BTreeMap<ObjectId, Car>,
    snapshots: Vec<StatisticsSnapshot>,
    audit: Vec<AuditRecord>,
}

/// Process-local backend with the same uniqueness rules as the MongoDB
/// indexes. Used for `STORAGE_BACKEND=memory` and throughout the tests.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| CatalogError::Storage("memory backend mutex poisoned".to_string()))
    }
}

impl MemoryState {
    fn check_unique(&self, entity: &CatalogEntity) -> Result<()> {
        let own = entity.id();
        let other = |id: &ObjectId| Some(*id) != own;
        let clash = match entity {
            CatalogEntity::Brand(b) => self
                .brands
                .iter()
                .any(|(id, e)| other(id) && e.name_key == b.name_key)
                .then(|| format!("brand '{}' already exists", b.name)),
            CatalogEntity::CarModel(m) => self
                .car_models
                .iter()
                .any(|(id, e)| other(id) && e.brand_id == m.brand_id && e.name_key == m.name_key)
                .then(|| format!("model '{}' already exists for brand {}", m.name, m.brand_id)),
            CatalogEntity::BodyType(b) => self
                .body_types
                .iter()
                .any(|(id, e)| other(id) && e.name_key == b.name_key)
                .then(|| format!("body type '{}' already exists", b.name)),
            CatalogEntity::Configuration(c) => self
                .configurations
                .iter()
                .any(|(id, e)| other(id) && e.name_key == c.name_key)
                .then(|| format!("configuration '{}' already exists", c.name)),
            CatalogEntity::Car(c) => match c.body_type_id {
                Some(body_type_id) => self
                    .cars
                    .iter()
                    .any(|(id, e)| other(id) && e.model_id == c.model_id && e.body_type_id == Some(body_type_id))
                    .then(|| format!("car for model {} and body type {} already exists", c.model_id, body_type_id)),
                None => None,
            },
        };
        match clash {
            Some(msg) => Err(CatalogError::Conflict(msg)),
            None => Ok(()),
        }
    }

    fn contains(&self, kind: EntityKind, id: &ObjectId) -> bool {
        match kind {
            EntityKind::Brand => self.brands.contains_key(id),
            EntityKind::CarModel => self.car_models.contains_key(id),
            EntityKind::BodyType => self.body_types.contains_key(id),
            EntityKind::Configuration => self.configurations.contains_key(id),
            EntityKind::Car => self.cars.contains_key(id),
            EntityKind::Statistic => self.snapshots.iter().any(|s| s.id.as_ref() == Some(id)),
        }
    }

    fn put(&mut self, id: ObjectId, entity: CatalogEntity) {
        match entity {
            CatalogEntity::Brand(e) => { self.brands.insert(id, e); }
            CatalogEntity::CarModel(e) => { self.car_models.insert(id, e); }
            CatalogEntity::BodyType(e) => { self.body_types.insert(id, e); }
            CatalogEntity::Configuration(e) => { self.configurations.insert(id, e); }
            CatalogEntity::Car(e) => { self.cars.insert(id, e); }
        }
    }
}

fn unsupported(kind: EntityKind, op: &str) -> CatalogError {
    CatalogError::Storage(format!("{} rows do not support {}", kind, op))
}

#[async_trait]
impl CatalogBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn find_brand(&self, name_key: &str) -> Result<Option<Brand>> {
        Ok(self.state()?.brands.values().find(|b| b.name_key == name_key).cloned())
    }

    async fn find_car_model(&self, brand_id: ObjectId, name_key: &str) -> Result<Option<CarModel>> {
        Ok(self
            .state()?
            .car_models
            .values()
            .find(|m| m.brand_id == brand_id && m.name_key == name_key)
            .cloned())
    }

    async fn find_body_type(&self, name_key: &str) -> Result<Option<BodyType>> {
        Ok(self.state()?.body_types.values().find(|b| b.name_key == name_key).cloned())
    }

    async fn find_configuration(&self, name_key: &str) -> Result<Option<Configuration>> {
        Ok(self.state()?.configurations.values().find(|c| c.name_key == name_key).cloned())
    }

    async fn find_car(&self, model_id: ObjectId, body_type_id: Option<ObjectId>) -> Result<Option<Car>> {
        Ok(self
            .state()?
            .cars
            .values()
            .find(|c| c.model_id == model_id && c.body_type_id == body_type_id)
            .cloned())
    }

    async fn get(&self, kind: EntityKind, id: ObjectId) -> Result<Option<CatalogEntity>> {
        let state = self.state()?;
        Ok(match kind {
            EntityKind::Brand => state.brands.get(&id).cloned().map(Into::into),
            EntityKind::CarModel => state.car_models.get(&id).cloned().map(Into::into),
            EntityKind::BodyType => state.body_types.get(&id).cloned().map(Into::into),
            EntityKind::Configuration => state.configurations.get(&id).cloned().map(Into::into),
            EntityKind::Car => state.cars.get(&id).cloned().map(Into::into),
            EntityKind::Statistic => return Err(unsupported(kind, "get")),
        })
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<CatalogEntity>> {
        let state = self.state()?;
        Ok(match kind {
            EntityKind::Brand => state.brands.values().cloned().map(Into::into).collect(),
            EntityKind::CarModel => state.car_models.values().cloned().map(Into::into).collect(),
            EntityKind::BodyType => state.body_types.values().cloned().map(Into::into).collect(),
            EntityKind::Configuration => state.configurations.values().cloned().map(Into::into).collect(),
            EntityKind::Car => state.cars.values().cloned().map(Into::into).collect(),
            EntityKind::Statistic => return Err(unsupported(kind, "list")),
        })
    }

    async fn car_models_of_brand(&self, brand_id: ObjectId) -> Result<Vec<CarModel>> {
        Ok(self
            .state()?
            .car_models
            .values()
            .filter(|m| m.brand_id == brand_id)
            .cloned()
            .collect())
    }

    async fn find_cars(&self, filter: &CarFilter) -> Result<Vec<Car>> {
        Ok(self
            .state()?
            .cars
            .values()
            .filter(|c| filter.model_id.map_or(true, |m| c.model_id == m))
            .filter(|c| filter.body_type_id.map_or(true, |b| c.body_type_id == Some(b)))
            .filter(|c| filter.configuration_id.map_or(true, |cfg| c.configuration_ids.contains(&cfg)))
            .cloned()
            .collect())
    }

    async fn insert(&self, entity: &CatalogEntity) -> Result<ObjectId> {
        let mut state = self.state()?;
        let id = entity.id().unwrap_or_else(ObjectId::new);
        if state.contains(entity.kind(), &id) {
            return Err(CatalogError::Conflict(format!("{} {} already exists", entity.kind(), id)));
        }
        let mut row = entity.clone();
        row.set_id(id);
        state.check_unique(&row)?;
        state.put(id, row);
        Ok(id)
    }

    async fn replace(&self, entity: &CatalogEntity) -> Result<()> {
        let kind = entity.kind();
        let id = entity
            .id()
            .ok_or_else(|| CatalogError::Storage(format!("cannot replace {} without id", kind)))?;
        let mut state = self.state()?;
        if !state.contains(kind, &id) {
            return Err(CatalogError::not_found(kind, id));
        }
        state.check_unique(entity)?;
        state.put(id, entity.clone());
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: ObjectId) -> Result<bool> {
        let mut state = self.state()?;
        Ok(match kind {
            EntityKind::Brand => state.brands.remove(&id).is_some(),
            EntityKind::CarModel => state.car_models.remove(&id).is_some(),
            EntityKind::BodyType => state.body_types.remove(&id).is_some(),
            EntityKind::Configuration => state.configurations.remove(&id).is_some(),
            EntityKind::Car => state.cars.remove(&id).is_some(),
            EntityKind::Statistic => return Err(unsupported(kind, "delete")),
        })
    }

    async fn count(&self, kind: EntityKind) -> Result<i64> {
        let state = self.state()?;
        let n = match kind {
            EntityKind::Brand => state.brands.len(),
            EntityKind::CarModel => state.car_models.len(),
            EntityKind::BodyType => state.body_types.len(),
            EntityKind::Configuration => state.configurations.len(),
            EntityKind::Car => state.cars.len(),
            EntityKind::Statistic => state.snapshots.len(),
        };
        Ok(n as i64)
    }

    async fn body_type_distribution(&self) -> Result<Vec<BodyTypeCount>> {
        let state = self.state()?;
        let mut per_body_type: HashMap<ObjectId, i64> = HashMap::new();
        for car in state.cars.values() {
            if let Some(bt) = car.body_type_id {
                *per_body_type.entry(bt).or_default() += 1;
            }
        }
        let mut rows: Vec<(&str, BodyTypeCount)> = state
            .body_types
            .iter()
            .map(|(id, bt)| {
                (
                    bt.name_key.as_str(),
                    BodyTypeCount { name: bt.name.clone(), car_count: per_body_type.get(id).copied().unwrap_or(0) },
                )
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(b.0));
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    async fn top_brands(&self, limit: usize) -> Result<Vec<BrandRanking>> {
        let state = self.state()?;
        let mut per_brand: HashMap<ObjectId, i64> = HashMap::new();
        for car in state.cars.values() {
            if let Some(model) = state.car_models.get(&car.model_id) {
                *per_brand.entry(model.brand_id).or_default() += 1;
            }
        }
        let mut ranked: Vec<(&Brand, i64)> = state
            .brands
            .iter()
            .map(|(id, brand)| (brand, per_brand.get(id).copied().unwrap_or(0)))
            .collect();
        ranked.sort_by(|(a, a_count), (b, b_count)| {
            b_count
                .cmp(a_count)
                .then_with(|| a.name_key.cmp(&b.name_key))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(brand, car_count)| BrandRanking { brand: brand.name.clone(), car_count })
            .collect())
    }

    async fn insert_snapshot(&self, snapshot: &StatisticsSnapshot) -> Result<ObjectId> {
        let mut state = self.state()?;
        let id = snapshot.id.unwrap_or_else(ObjectId::new);
        let mut stored = snapshot.clone();
        stored.id = Some(id);
        state.snapshots.push(stored);
        Ok(id)
    }

    async fn latest_snapshot(&self) -> Result<Option<StatisticsSnapshot>> {
        let state = self.state()?;
        // later insert wins on equal timestamps
        let latest = state.snapshots.iter().fold(None::<&StatisticsSnapshot>, |best, s| match best {
            Some(b) if b.created_at > s.created_at => Some(b),
            _ => Some(s),
        });
        Ok(latest.cloned())
    }

    async fn insert_audit(&self, record: &AuditRecord) -> Result<ObjectId> {
        let mut state = self.state()?;
        let id = ObjectId::new();
        let mut stored = record.clone();
        stored.id = Some(id);
        state.audit.push(stored);
        Ok(id)
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        let state = self.state()?;
        Ok(state
            .audit
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}
