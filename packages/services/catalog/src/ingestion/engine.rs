use std::path::Path;

use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::handlers::load_source;
use crate::ingestion::normalize::normalize_descriptor;
use crate::models::*;

/// Which rows a single descriptor brought into existence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreatedRows {
    pub brand: bool,
    pub model: bool,
    pub body_type: bool,
    pub configuration: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorOutcome {
    /// A new car was written.
    Created { car: Car, rows: CreatedRows },
    /// A car with the same model and body type was already there.
    Existing { car: Car, rows: CreatedRows },
    /// Required fields were missing after normalization; nothing was written.
    Invalid { missing: Vec<&'static str> },
}

impl DescriptorOutcome {
    pub fn car(&self) -> Option<&Car> {
        match self {
            DescriptorOutcome::Created { car, .. } | DescriptorOutcome::Existing { car, .. } => Some(car),
            DescriptorOutcome::Invalid { .. } => None,
        }
    }
}

impl BatchReport {
    fn tally(&mut self, outcome: &DescriptorOutcome) {
        let rows = match outcome {
            DescriptorOutcome::Created { rows, .. } => {
                self.cars_processed += 1;
                rows
            }
            DescriptorOutcome::Existing { rows, .. } => {
                self.skipped += 1;
                rows
            }
            DescriptorOutcome::Invalid { .. } => {
                self.invalid_entries += 1;
                return;
            }
        };
        self.created_brands += rows.brand as i64;
        self.created_models += rows.model as i64;
        self.created_body_types += rows.body_type as i64;
        self.created_configurations += rows.configuration as i64;
    }
}

/// Turns raw vehicle records into catalog rows. Every descriptor is handled
/// on its own: a failure is logged and counted, and the batch moves on.
#[derive(Clone)]
pub struct IngestionEngine {
    store: CatalogStore,
    cfg: Config,
}

impl IngestionEngine {
    pub fn new(store: CatalogStore, cfg: Config) -> Self {
        Self { store, cfg }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// Ingests the configured source file.
    pub async fn ingest_default_source(&self, actor: &ActorContext) -> Result<BatchReport> {
        let path = self.cfg.ingestion_source_path.clone();
        self.ingest_file(actor, Path::new(&path)).await
    }

    /// A missing or unparsable file fails the whole batch before anything is
    /// written.
    pub async fn ingest_file(&self, actor: &ActorContext, path: &Path) -> Result<BatchReport> {
        let records = match load_source(path, Some(&self.cfg)).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(source = %path.display(), error = %e, "Failed to load ingestion source");
                return Err(e);
            }
        };
        Ok(self.ingest_records(actor, records, Some(path.display().to_string())).await)
    }

    pub async fn ingest_records(&self, actor: &ActorContext, records: Vec<Value>, source: Option<String>) -> BatchReport {
        let start_time = Instant::now();
        let mut report = BatchReport {
            batch_id: Uuid::new_v4().to_string(),
            source,
            total_records: records.len() as i64,
            ..Default::default()
        };

        tracing::info!(
            batch_id = %report.batch_id,
            source = report.source.as_deref().unwrap_or("inline"),
            total_records = report.total_records,
            "Starting ingestion batch"
        );

        for (index, record) in records.iter().enumerate() {
            let Some(descriptor) = VehicleDescriptor::from_json(record) else {
                tracing::warn!(batch_id = %report.batch_id, index, "Record is not an object; skipping");
                report.invalid_entries += 1;
                continue;
            };
            match self.ingest_descriptor(actor, &descriptor).await {
                Ok(outcome) => {
                    if let DescriptorOutcome::Invalid { missing } = &outcome {
                        tracing::warn!(
                            batch_id = %report.batch_id,
                            index,
                            missing = ?missing,
                            "Descriptor is missing required fields"
                        );
                    }
                    report.tally(&outcome);
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(
                        batch_id = %report.batch_id,
                        index,
                        brand = descriptor.brand.as_deref().unwrap_or(""),
                        model = descriptor.model.as_deref().unwrap_or(""),
                        error = %e,
                        "Failed to ingest descriptor"
                    );
                }
            }
        }

        report.duration_ms = start_time.elapsed().as_millis() as i64;
        tracing::info!(
            batch_id = %report.batch_id,
            cars_processed = report.cars_processed,
            skipped = report.skipped,
            invalid_entries = report.invalid_entries,
            errors = report.errors,
            duration_ms = report.duration_ms,
            "Ingestion batch finished"
        );
        report
    }

    /// Normalizes one descriptor and resolves it to a car, creating whatever
    /// rows are missing along the way.
    pub async fn ingest_descriptor(&self, actor: &ActorContext, raw: &VehicleDescriptor) -> Result<DescriptorOutcome> {
        let descriptor = match normalize_descriptor(raw) {
            Ok(d) => d,
            Err(missing) => return Ok(DescriptorOutcome::Invalid { missing }),
        };

        let mut rows = CreatedRows::default();
        let brand = self.store.get_or_create_brand(actor, &descriptor.brand).await?;
        rows.brand = brand.created;
        let brand_id = persisted_id(brand.value.id, EntityKind::Brand)?;

        let model = self.store.get_or_create_car_model(actor, brand_id, &descriptor.model).await?;
        rows.model = model.created;
        let model_id = persisted_id(model.value.id, EntityKind::CarModel)?;

        let body_type = self.store.get_or_create_body_type(actor, &descriptor.body_type).await?;
        rows.body_type = body_type.created;
        let body_type_id = persisted_id(body_type.value.id, EntityKind::BodyType)?;

        let mut configuration_ids = Vec::new();
        if let Some(name) = descriptor.configuration.as_deref() {
            let configuration = self.store.get_or_create_configuration(actor, name).await?;
            rows.configuration = configuration.created;
            configuration_ids.push(persisted_id(configuration.value.id, EntityKind::Configuration)?);
        }

        let car = self
            .store
            .get_or_create_car(actor, model_id, Some(body_type_id), configuration_ids)
            .await?;
        Ok(if car.created {
            DescriptorOutcome::Created { car: car.value, rows }
        } else {
            DescriptorOutcome::Existing { car: car.value, rows }
        })
    }
}

fn persisted_id(id: Option<mongodb::bson::oid::ObjectId>, kind: EntityKind) -> Result<mongodb::bson::oid::ObjectId> {
    id.ok_or_else(|| CatalogError::Storage(format!("{} row has no id", kind)))
}
