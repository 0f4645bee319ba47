use anyhow::Result;
use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::{Database, IndexModel};

use crate::migrations::Migration;
use crate::models::EntityKind;
use crate::register_migration;

/// Uniqueness for the catalog collections. Names compare through `name_key`.
#[derive(Default)]
pub struct CatalogIndexes;

register_migration!(CatalogIndexes);

fn unique(keys: Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

#[async_trait]
impl Migration for CatalogIndexes {
    fn version(&self) -> u32 { 1 }
    fn description(&self) -> &str { "Unique name and composite indexes for brands, car_models, body_types, configurations, cars" }

    async fn up(&self, db: &Database) -> Result<()> {
        tracing::info!("Creating catalog indexes");

        for kind in [EntityKind::Brand, EntityKind::BodyType, EntityKind::Configuration] {
            db.collection::<Document>(kind.collection())
                .create_index(unique(doc! { "name_key": 1 }), None)
                .await?;
        }

        let models = db.collection::<Document>(EntityKind::CarModel.collection());
        models.create_index(unique(doc! { "brand_id": 1, "name_key": 1 }), None).await?;

        let cars = db.collection::<Document>(EntityKind::Car.collection());
        // cars whose body type was detached fall outside the constraint
        cars.create_index(
            IndexModel::builder()
                .keys(doc! { "model_id": 1, "body_type_id": 1 })
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! { "body_type_id": { "$type": "objectId" } })
                        .build(),
                )
                .build(),
            None,
        )
        .await?;
        cars.create_index(IndexModel::builder().keys(doc! { "body_type_id": 1 }).build(), None).await?;
        cars.create_index(IndexModel::builder().keys(doc! { "configuration_ids": 1 }).build(), None).await?;

        Ok(())
    }
}
