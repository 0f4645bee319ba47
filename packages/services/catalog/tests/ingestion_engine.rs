mod common;

use std::io::Write;

use serde_json::json;

use catalog_service::config::Config;
use catalog_service::ingestion::{DescriptorOutcome, IngestionEngine};
use catalog_service::models::*;

use common::{actor, audit, count, flaky_store, memory_store};

fn engine() -> IngestionEngine {
    IngestionEngine::new(memory_store(), Config::default())
}

fn temp_source(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

const CATALOG_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<catalog>
  <car>
    <brand>Toyota</brand>
    <model>Camry</model>
    <body_type>Sedan</body_type>
    <engine>2.5</engine>
    <fuel>petrol</fuel>
  </car>
  <car>
    <make>toyota</make>
    <model>RAV4</model>
    <bodytype>SUV</bodytype>
  </car>
  <car>
    <brand>Lada</brand>
    <model>Niva</model>
    <body>SUV</body>
  </car>
  <car>
    <brand>???</brand>
    <model>Ghost</model>
    <body_type>Coupe</body_type>
  </car>
</catalog>"#;

#[tokio::test]
async fn toyota_descriptor_creates_all_rows_once() {
    let engine = engine();
    let store = engine.store().clone();
    let outcome = engine
        .ingest_descriptor(&actor("alice"), &VehicleDescriptor::new("Toyota!", "Corolla", "Sedan"))
        .await
        .unwrap();

    let DescriptorOutcome::Created { car, rows } = outcome else {
        panic!("expected a new car");
    };
    assert!(rows.brand && rows.model && rows.body_type);
    assert!(!rows.configuration);

    let brands: Vec<Brand> = store.list(EntityKind::Brand).await.unwrap();
    assert_eq!(brands.len(), 1);
    assert_eq!(brands[0].name, "Toyota");
    let models: Vec<CarModel> = store.list(EntityKind::CarModel).await.unwrap();
    assert_eq!(models[0].name, "Corolla");
    assert_eq!(models[0].brand_id, brands[0].id.unwrap());
    assert_eq!(car.model_id, models[0].id.unwrap());
    assert_eq!(count(&store, EntityKind::Car).await, 1);

    let created = audit(&store, AuditFilter { action: Some(AuditAction::Created), ..Default::default() }).await;
    assert_eq!(created.len(), 4);
    assert!(created.iter().all(|r| r.actor.as_deref() == Some("alice")));
}

#[tokio::test]
async fn repeated_descriptor_is_idempotent() {
    let engine = engine();
    let store = engine.store().clone();
    let descriptor = VehicleDescriptor::new("Toyota", "Corolla", "Sedan");

    engine.ingest_descriptor(&actor("a"), &descriptor).await.unwrap();
    let audit_before = audit(&store, AuditFilter::default()).await.len();
    let second = engine.ingest_descriptor(&actor("a"), &descriptor).await.unwrap();

    assert!(matches!(second, DescriptorOutcome::Existing { rows, .. } if rows == Default::default()));
    assert_eq!(count(&store, EntityKind::Brand).await, 1);
    assert_eq!(count(&store, EntityKind::CarModel).await, 1);
    assert_eq!(count(&store, EntityKind::BodyType).await, 1);
    assert_eq!(count(&store, EntityKind::Car).await, 1);
    assert_eq!(audit(&store, AuditFilter::default()).await.len(), audit_before);
}

#[tokio::test]
async fn names_are_reused_case_insensitively() {
    let engine = engine();
    let store = engine.store().clone();
    engine.ingest_descriptor(&actor("a"), &VehicleDescriptor::new("Toyota", "Camry", "Sedan")).await.unwrap();
    engine.ingest_descriptor(&actor("a"), &VehicleDescriptor::new("TOYOTA", "Corolla", "sedan")).await.unwrap();

    let brands: Vec<Brand> = store.list(EntityKind::Brand).await.unwrap();
    assert_eq!(brands.len(), 1);
    assert_eq!(brands[0].name, "Toyota");
    assert_eq!(count(&store, EntityKind::BodyType).await, 1);
    assert_eq!(count(&store, EntityKind::Car).await, 2);
}

#[tokio::test]
async fn invalid_descriptor_writes_nothing() {
    let engine = engine();
    let store = engine.store().clone();
    let raw = VehicleDescriptor { brand: Some("!!!".into()), model: Some("X5".into()), body_type: None, configuration: None };

    let outcome = engine.ingest_descriptor(&actor("a"), &raw).await.unwrap();

    assert_eq!(outcome, DescriptorOutcome::Invalid { missing: vec!["brand", "body_type"] });
    assert_eq!(count(&store, EntityKind::Brand).await, 0);
    assert_eq!(count(&store, EntityKind::CarModel).await, 0);
    assert!(audit(&store, AuditFilter::default()).await.is_empty());
}

#[tokio::test]
async fn configuration_is_created_and_linked() {
    let engine = engine();
    let store = engine.store().clone();
    let mut descriptor = VehicleDescriptor::new("Kia", "Rio", "Hatchback");
    descriptor.configuration = Some("Comfort".into());

    let outcome = engine.ingest_descriptor(&actor("a"), &descriptor).await.unwrap();
    let DescriptorOutcome::Created { car, rows } = outcome else { panic!("car should be new") };
    assert!(rows.configuration);

    let configurations: Vec<Configuration> = store.list(EntityKind::Configuration).await.unwrap();
    assert_eq!(car.configuration_ids, vec![configurations[0].id.unwrap()]);
    // configurations are not audited
    let audited = audit(&store, AuditFilter { entity_type: Some(EntityKind::Configuration), ..Default::default() }).await;
    assert!(audited.is_empty());
}

#[tokio::test]
async fn xml_file_batch_counts_every_outcome() {
    let engine = engine();
    let store = engine.store().clone();
    let source = temp_source(".xml", CATALOG_XML);

    let report = engine.ingest_file(&actor("loader"), source.path()).await.unwrap();

    assert_eq!(report.total_records, 4);
    assert_eq!(report.created_brands, 2);
    assert_eq!(report.created_models, 3);
    assert_eq!(report.created_body_types, 2);
    assert_eq!(report.cars_processed, 3);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.invalid_entries, 1);
    assert_eq!(report.errors, 0);
    assert!(uuid::Uuid::parse_str(&report.batch_id).is_ok());
    assert_eq!(report.source.as_deref(), Some(source.path().display().to_string().as_str()));

    let again = engine.ingest_file(&actor("loader"), source.path()).await.unwrap();
    assert_eq!(again.cars_processed, 0);
    assert_eq!(again.skipped, 3);
    assert_eq!(again.created_brands, 0);
    assert_eq!(count(&store, EntityKind::Car).await, 3);
}

#[tokio::test]
async fn json_and_jsonl_sources_are_accepted() {
    let engine = engine();
    let json_source = temp_source(
        ".json",
        &json!([
            {"brand": "BMW", "model": "X5", "body_type": "SUV"},
            {"brand": "BMW", "model": 3, "body_type": "Sedan"},
            "not an object"
        ])
        .to_string(),
    );
    let report = engine.ingest_file(&actor("a"), json_source.path()).await.unwrap();
    assert_eq!(report.total_records, 3);
    assert_eq!(report.cars_processed, 2);
    assert_eq!(report.invalid_entries, 1);

    let jsonl_source = temp_source(
        ".jsonl",
        "{\"brand\":\"bmw\",\"model\":\"x5\",\"body_type\":\"suv\"}\n\n{\"make\":\"Audi\",\"model\":\"A4\",\"bodyType\":\"Sedan\"}\n",
    );
    let report = engine.ingest_file(&actor("a"), jsonl_source.path()).await.unwrap();
    assert_eq!(report.total_records, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.cars_processed, 1);
    assert_eq!(report.created_brands, 1);
}

#[tokio::test]
async fn missing_source_is_a_hard_error() {
    let engine = engine();
    let dir = tempfile::tempdir().unwrap();
    let err = engine.ingest_file(&actor("a"), &dir.path().join("Autocatalog.xml")).await.unwrap_err();
    assert!(matches!(err, CatalogError::SourceNotFound(_)));
}

#[tokio::test]
async fn malformed_xml_writes_nothing() {
    let engine = engine();
    let store = engine.store().clone();
    let source = temp_source(".xml", "<catalog><car><brand>Toyota</brand><model>Camry</model>");

    let err = engine.ingest_file(&actor("a"), source.path()).await.unwrap_err();

    assert!(matches!(err, CatalogError::XmlParsing(_)));
    assert_eq!(count(&store, EntityKind::Brand).await, 0);
}

#[tokio::test]
async fn custom_record_element_is_honoured() {
    let cfg = Config { xml_record_element: "vehicle".into(), ..Config::default() };
    let engine = IngestionEngine::new(memory_store(), cfg);
    let source = temp_source(
        ".xml",
        "<fleet><vehicle><brand>Volvo</brand><model>XC90</model><body_type>SUV</body_type></vehicle><car><brand>Skip</brand></car></fleet>",
    );
    let report = engine.ingest_file(&actor("a"), source.path()).await.unwrap();
    assert_eq!(report.total_records, 1);
    assert_eq!(report.cars_processed, 1);
}

#[tokio::test]
async fn audit_outage_does_not_block_ingestion() {
    let (backend, store) = flaky_store();
    common::FlakyBackend::set(&backend.fail_audit, true);
    let engine = IngestionEngine::new(store.clone(), Config::default());

    let report = engine
        .ingest_records(&actor("a"), vec![json!({"brand": "Opel", "model": "Astra", "body_type": "Wagon"})], None)
        .await;

    assert_eq!(report.cars_processed, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(count(&store, EntityKind::Car).await, 1);
    assert!(audit(&store, AuditFilter::default()).await.is_empty());
}

#[tokio::test]
async fn renamed_brand_is_found_by_later_ingest_of_same_text() {
    let engine = engine();
    let store = engine.store().clone();
    let outcome = engine
        .ingest_descriptor(&actor("alice"), &VehicleDescriptor::new("Toyota", "Corolla", "Sedan"))
        .await
        .unwrap();
    let model_id = outcome.car().unwrap().model_id;
    let brand_id = store.get::<CarModel>(EntityKind::CarModel, model_id).await.unwrap().brand_id;

    let renamed = store.rename_brand(&actor("bob"), brand_id, "Toyota Motor!!").await.unwrap();
    assert_eq!(renamed.name, "Toyota Motor");
    assert_eq!(renamed.name_key, "toyota motor");

    engine
        .ingest_descriptor(&actor("alice"), &VehicleDescriptor::new("Toyota Motor!!", "Corolla", "Sedan"))
        .await
        .unwrap();
    assert_eq!(count(&store, EntityKind::Brand).await, 1);
}

#[tokio::test]
async fn punctuation_only_rename_is_rejected() {
    let engine = engine();
    let store = engine.store().clone();
    let outcome = engine
        .ingest_descriptor(&actor("alice"), &VehicleDescriptor::new("Kia", "Rio", "Hatchback"))
        .await
        .unwrap();
    let body_type_id = outcome.car().unwrap().body_type_id.unwrap();
    let err = store.rename_body_type(&actor("bob"), body_type_id, "?!").await.unwrap_err();
    assert!(matches!(err, CatalogError::InvalidDescriptor(_)));
}
