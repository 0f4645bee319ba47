mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use catalog_service::audit::{AuditRecorder, MutationObserver};
use catalog_service::catalog::CatalogStore;
use catalog_service::models::*;
use catalog_service::storage::{CatalogBackend, MemoryBackend};

use common::{actor, audit, count, flaky_store, memory_store, FlakyBackend};

async fn seed(store: &CatalogStore) -> (Brand, CarModel, BodyType, Car) {
    let a = actor("seed");
    let brand = store.get_or_create_brand(&a, "Toyota").await.unwrap().value;
    let model = store.get_or_create_car_model(&a, brand.id.unwrap(), "Corolla").await.unwrap().value;
    let body_type = store.get_or_create_body_type(&a, "Sedan").await.unwrap().value;
    let car = store
        .get_or_create_car(&a, model.id.unwrap(), body_type.id, vec![])
        .await
        .unwrap()
        .value;
    (brand, model, body_type, car)
}

fn by_entity(id: Option<mongodb::bson::oid::ObjectId>, action: AuditAction) -> AuditFilter {
    AuditFilter { entity_id: id, action: Some(action), ..Default::default() }
}

#[tokio::test]
async fn rename_records_exact_diff() {
    let store = memory_store();
    let (brand, ..) = seed(&store).await;

    let renamed = store.rename_brand(&actor("bob"), brand.id.unwrap(), "Toyota Motor").await.unwrap();
    assert_eq!(renamed.name, "Toyota Motor");

    let updates = audit(&store, by_entity(brand.id, AuditAction::Updated)).await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].entity_type, EntityKind::Brand);
    assert_eq!(updates[0].actor.as_deref(), Some("bob"));
    assert_eq!(updates[0].changes, json!({"name": {"old": "Toyota", "new": "Toyota Motor"}}));
}

#[tokio::test]
async fn unchanged_update_writes_no_record() {
    let store = memory_store();
    let (brand, ..) = seed(&store).await;

    store.rename_brand(&actor("bob"), brand.id.unwrap(), "Toyota").await.unwrap();

    assert!(audit(&store, by_entity(brand.id, AuditAction::Updated)).await.is_empty());
}

#[tokio::test]
async fn body_type_change_is_diffed_on_the_car() {
    let store = memory_store();
    let (_, _, sedan, car) = seed(&store).await;
    let hatch = store.get_or_create_body_type(&actor("a"), "Hatchback").await.unwrap().value;

    store.set_car_body_type(&actor("a"), car.id.unwrap(), hatch.id).await.unwrap();

    let updates = audit(&store, by_entity(car.id, AuditAction::Updated)).await;
    assert_eq!(updates.len(), 1);
    assert_eq!(
        updates[0].changes,
        json!({"body_type": {"old": sedan.id.unwrap().to_hex(), "new": hatch.id.unwrap().to_hex()}})
    );
}

#[tokio::test]
async fn delete_writes_one_record() {
    let store = memory_store();
    let (.., car) = seed(&store).await;

    assert!(store.delete_car(&actor("carol"), car.id.unwrap()).await.unwrap());
    assert!(!store.delete_car(&actor("carol"), car.id.unwrap()).await.unwrap());

    let deletes = audit(&store, by_entity(car.id, AuditAction::Deleted)).await;
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].changes, json!({"deleted": true}));
    assert_eq!(deletes[0].actor.as_deref(), Some("carol"));
    assert_eq!(count(&store, EntityKind::Car).await, 0);
}

/// Records whether the row was still present when `deleting` fired.
struct PresenceProbe {
    backend: Arc<MemoryBackend>,
    inner: AuditRecorder,
    seen: Mutex<Vec<bool>>,
}

#[async_trait]
impl MutationObserver for PresenceProbe {
    async fn created(&self, actor: &ActorContext, subject: &dyn AuditSubject) {
        self.inner.created(actor, subject).await;
    }

    async fn updated(&self, actor: &ActorContext, before: &dyn AuditSubject, after: &dyn AuditSubject) {
        self.inner.updated(actor, before, after).await;
    }

    async fn deleting(&self, actor: &ActorContext, subject: &dyn AuditSubject) {
        let id = subject.entity_id().unwrap();
        let present = self.backend.get(subject.kind(), id).await.unwrap().is_some();
        self.seen.lock().unwrap().push(present);
        self.inner.deleting(actor, subject).await;
    }
}

#[tokio::test]
async fn delete_record_is_written_before_removal() {
    let backend = Arc::new(MemoryBackend::new());
    let probe = Arc::new(PresenceProbe {
        backend: backend.clone(),
        inner: AuditRecorder::new(backend.clone()),
        seen: Mutex::new(Vec::new()),
    });
    let store = CatalogStore::with_observer(backend.clone(), probe.clone());
    let (.., car) = seed(&store).await;

    store.delete_car(&actor("a"), car.id.unwrap()).await.unwrap();

    assert_eq!(*probe.seen.lock().unwrap(), vec![true]);
    assert_eq!(audit(&store, by_entity(car.id, AuditAction::Deleted)).await.len(), 1);
}

#[tokio::test]
async fn brand_delete_cascades_with_a_record_per_row() {
    let store = memory_store();
    let (brand, model, _, car) = seed(&store).await;

    store.delete_brand(&actor("admin"), brand.id.unwrap()).await.unwrap();

    assert_eq!(count(&store, EntityKind::Brand).await, 0);
    assert_eq!(count(&store, EntityKind::CarModel).await, 0);
    assert_eq!(count(&store, EntityKind::Car).await, 0);
    assert_eq!(count(&store, EntityKind::BodyType).await, 1);
    for id in [brand.id, model.id, car.id] {
        assert_eq!(audit(&store, by_entity(id, AuditAction::Deleted)).await.len(), 1);
    }
}

#[tokio::test]
async fn body_type_delete_nulls_the_reference() {
    let store = memory_store();
    let (_, _, body_type, car) = seed(&store).await;

    store.delete_body_type(&actor("admin"), body_type.id.unwrap()).await.unwrap();

    let reloaded: Car = store.get(EntityKind::Car, car.id.unwrap()).await.unwrap();
    assert_eq!(reloaded.body_type_id, None);
    let updates = audit(&store, by_entity(car.id, AuditAction::Updated)).await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].changes["body_type"]["new"], "null");
    assert_eq!(audit(&store, by_entity(body_type.id, AuditAction::Deleted)).await.len(), 1);
}

#[tokio::test]
async fn configurations_are_not_audited() {
    let store = memory_store();
    let (.., car) = seed(&store).await;
    let a = actor("admin");
    let configuration = store.get_or_create_configuration(&a, "Comfort").await.unwrap().value;
    let configuration_id = configuration.id.unwrap();
    store.link_configuration(&a, car.id.unwrap(), configuration_id).await.unwrap();
    let before = audit(&store, AuditFilter::default()).await.len();

    store.rename_configuration(&a, configuration_id, "Luxury").await.unwrap();
    store.delete_configuration(&a, configuration_id).await.unwrap();

    let reloaded: Car = store.get(EntityKind::Car, car.id.unwrap()).await.unwrap();
    assert!(reloaded.configuration_ids.is_empty());
    assert_eq!(audit(&store, AuditFilter::default()).await.len(), before);
}

#[tokio::test]
async fn anonymous_actor_is_null() {
    let store = memory_store();
    let brand = store.get_or_create_brand(&ActorContext::anonymous(), "Lada").await.unwrap().value;
    let created = audit(&store, by_entity(brand.id, AuditAction::Created)).await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].actor, None);
    assert_eq!(created[0].changes, json!({"created": true}));
}

#[tokio::test]
async fn audit_failure_does_not_block_mutations() {
    let (backend, store) = flaky_store();
    let (brand, ..) = seed(&store).await;
    FlakyBackend::set(&backend.fail_audit, true);

    let renamed = store.rename_brand(&actor("a"), brand.id.unwrap(), "Toyota Motor").await.unwrap();
    assert_eq!(renamed.name, "Toyota Motor");
    assert!(store.delete_brand(&actor("a"), brand.id.unwrap()).await.unwrap());

    FlakyBackend::set(&backend.fail_audit, false);
    assert!(audit(&store, by_entity(brand.id, AuditAction::Updated)).await.is_empty());
    assert_eq!(count(&store, EntityKind::Brand).await, 0);
}

#[tokio::test]
async fn empty_rename_is_rejected_without_writes() {
    let store = memory_store();
    let (brand, ..) = seed(&store).await;
    let err = store.rename_brand(&actor("a"), brand.id.unwrap(), "   ").await.unwrap_err();
    assert!(matches!(err, CatalogError::InvalidDescriptor(_)));
    assert!(audit(&store, by_entity(brand.id, AuditAction::Updated)).await.is_empty());
}

#[tokio::test]
async fn audit_log_filters_and_limits_newest_first() {
    let store = memory_store();
    let a = actor("a");
    for name in ["Audi", "BMW", "Citroen"] {
        store.get_or_create_brand(&a, name).await.unwrap();
    }
    let records = audit(
        &store,
        AuditFilter { entity_type: Some(EntityKind::Brand), limit: Some(2), ..Default::default() },
    )
    .await;
    assert_eq!(records.len(), 2);
    let brands: Vec<Brand> = store.list(EntityKind::Brand).await.unwrap();
    assert_eq!(records[0].entity_id, brands[2].id);
    assert_eq!(records[1].entity_id, brands[1].id);
}
