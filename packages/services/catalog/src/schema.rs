use std::path::PathBuf;

use async_graphql::{Context, EmptySubscription, Json, Object, Result as GraphQLResult, Schema, SimpleObject, ID};
use mongodb::bson::oid::ObjectId;
use serde_json::Value;

use crate::catalog::CatalogStore;
use crate::ingestion::IngestionEngine;
use crate::models::*;
use crate::statistics::{RefreshOutcome, StatisticsAggregator};

pub type CatalogSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub fn build_schema(store: CatalogStore, engine: IngestionEngine, aggregator: StatisticsAggregator) -> CatalogSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(store)
        .data(engine)
        .data(aggregator)
        .finish()
}

fn hex(id: Option<ObjectId>) -> Option<ID> {
    id.map(|id| ID(id.to_hex()))
}

fn parse_id(id: &ID) -> GraphQLResult<ObjectId> {
    Ok(ObjectId::parse_str(id.as_str())?)
}

/// The request's actor, attached by the HTTP handler. Missing means anonymous.
fn actor(ctx: &Context<'_>) -> ActorContext {
    ctx.data_opt::<ActorContext>().cloned().unwrap_or_default()
}

#[derive(SimpleObject)]
pub struct BrandView {
    pub id: Option<ID>,
    pub name: String,
}

impl From<Brand> for BrandView {
    fn from(b: Brand) -> Self {
        Self { id: hex(b.id), name: b.name }
    }
}

#[derive(SimpleObject)]
pub struct CarModelView {
    pub id: Option<ID>,
    pub brand_id: ID,
    pub name: String,
}

impl From<CarModel> for CarModelView {
    fn from(m: CarModel) -> Self {
        Self { id: hex(m.id), brand_id: ID(m.brand_id.to_hex()), name: m.name }
    }
}

/// Shared shape for body types and configurations.
#[derive(SimpleObject)]
pub struct NamedView {
    pub id: Option<ID>,
    pub name: String,
}

impl From<BodyType> for NamedView {
    fn from(b: BodyType) -> Self {
        Self { id: hex(b.id), name: b.name }
    }
}

impl From<Configuration> for NamedView {
    fn from(c: Configuration) -> Self {
        Self { id: hex(c.id), name: c.name }
    }
}

#[derive(SimpleObject)]
pub struct CarView {
    pub id: Option<ID>,
    pub model_id: ID,
    pub body_type_id: Option<ID>,
    pub configuration_ids: Vec<ID>,
}

impl From<Car> for CarView {
    fn from(c: Car) -> Self {
        Self {
            id: hex(c.id),
            model_id: ID(c.model_id.to_hex()),
            body_type_id: hex(c.body_type_id),
            configuration_ids: c.configuration_ids.iter().map(|id| ID(id.to_hex())).collect(),
        }
    }
}

#[derive(SimpleObject)]
pub struct AuditRecordView {
    pub id: Option<ID>,
    pub entity_type: EntityKind,
    pub entity_id: Option<ID>,
    pub action: AuditAction,
    pub changes: Json<Value>,
    pub actor: Option<String>,
    pub timestamp: String,
}

impl From<AuditRecord> for AuditRecordView {
    fn from(r: AuditRecord) -> Self {
        Self {
            id: hex(r.id),
            entity_type: r.entity_type,
            entity_id: hex(r.entity_id),
            action: r.action,
            changes: Json(r.changes),
            actor: r.actor,
            timestamp: r.timestamp.to_chrono().to_rfc3339(),
        }
    }
}

#[derive(SimpleObject)]
pub struct StatisticsView {
    pub id: Option<ID>,
    pub data: Json<StatisticsReport>,
    pub date_calculated: String,
    /// True when this is the last saved snapshot served after a failed refresh
    pub stale: bool,
    pub error: Option<String>,
}

impl From<StatisticsSnapshot> for StatisticsView {
    fn from(s: StatisticsSnapshot) -> Self {
        let date_calculated = s.created_at_rfc3339();
        Self { id: hex(s.id), data: Json(s.data), date_calculated, stale: false, error: None }
    }
}

impl From<RefreshOutcome> for StatisticsView {
    fn from(outcome: RefreshOutcome) -> Self {
        match outcome {
            RefreshOutcome::Fresh(snapshot) => snapshot.into(),
            RefreshOutcome::Stale { snapshot, error } => {
                Self { stale: true, error: Some(error), ..Self::from(snapshot) }
            }
        }
    }
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Audit records, newest first. `limit` defaults to 100 and must be positive.
    async fn audit_log(
        &self,
        ctx: &Context<'_>,
        entity_type: Option<EntityKind>,
        action: Option<AuditAction>,
        entity_id: Option<ID>,
        limit: Option<i32>,
    ) -> GraphQLResult<Vec<AuditRecordView>> {
        let store = ctx.data::<CatalogStore>()?;
        let limit = limit.unwrap_or(100);
        if limit < 1 {
            return Err(async_graphql::Error::new("limit must be at least 1"));
        }
        let filter = AuditFilter {
            entity_type,
            action,
            entity_id: entity_id.as_ref().map(parse_id).transpose()?,
            limit: Some(limit as usize),
        };
        let records = store.audit_log(&filter).await?;
        Ok(records.into_iter().map(Into::into).collect())
    }

    async fn latest_statistics(&self, ctx: &Context<'_>) -> GraphQLResult<Option<StatisticsView>> {
        let store = ctx.data::<CatalogStore>()?;
        Ok(store.latest_snapshot().await?.map(Into::into))
    }

    async fn brands(&self, ctx: &Context<'_>) -> GraphQLResult<Vec<BrandView>> {
        let store = ctx.data::<CatalogStore>()?;
        let brands: Vec<Brand> = store.list(EntityKind::Brand).await?;
        Ok(brands.into_iter().map(Into::into).collect())
    }

    async fn health(&self) -> GraphQLResult<String> {
        Ok("OK".to_string())
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn rename_brand(&self, ctx: &Context<'_>, id: ID, name: String) -> GraphQLResult<BrandView> {
        let store = ctx.data::<CatalogStore>()?;
        Ok(store.rename_brand(&actor(ctx), parse_id(&id)?, &name).await?.into())
    }

    async fn rename_car_model(&self, ctx: &Context<'_>, id: ID, name: String) -> GraphQLResult<CarModelView> {
        let store = ctx.data::<CatalogStore>()?;
        Ok(store.rename_car_model(&actor(ctx), parse_id(&id)?, &name).await?.into())
    }

    async fn rename_body_type(&self, ctx: &Context<'_>, id: ID, name: String) -> GraphQLResult<NamedView> {
        let store = ctx.data::<CatalogStore>()?;
        Ok(store.rename_body_type(&actor(ctx), parse_id(&id)?, &name).await?.into())
    }

    async fn rename_configuration(&self, ctx: &Context<'_>, id: ID, name: String) -> GraphQLResult<NamedView> {
        let store = ctx.data::<CatalogStore>()?;
        Ok(store.rename_configuration(&actor(ctx), parse_id(&id)?, &name).await?.into())
    }

    /// Pass `bodyTypeId: null` to detach the body type.
    async fn update_car_body_type(
        &self,
        ctx: &Context<'_>,
        id: ID,
        body_type_id: Option<ID>,
    ) -> GraphQLResult<CarView> {
        let store = ctx.data::<CatalogStore>()?;
        let body_type_id = body_type_id.as_ref().map(parse_id).transpose()?;
        Ok(store.set_car_body_type(&actor(ctx), parse_id(&id)?, body_type_id).await?.into())
    }

    async fn delete_brand(&self, ctx: &Context<'_>, id: ID) -> GraphQLResult<bool> {
        let store = ctx.data::<CatalogStore>()?;
        Ok(store.delete_brand(&actor(ctx), parse_id(&id)?).await?)
    }

    async fn delete_car_model(&self, ctx: &Context<'_>, id: ID) -> GraphQLResult<bool> {
        let store = ctx.data::<CatalogStore>()?;
        Ok(store.delete_car_model(&actor(ctx), parse_id(&id)?).await?)
    }

    async fn delete_body_type(&self, ctx: &Context<'_>, id: ID) -> GraphQLResult<bool> {
        let store = ctx.data::<CatalogStore>()?;
        Ok(store.delete_body_type(&actor(ctx), parse_id(&id)?).await?)
    }

    async fn delete_configuration(&self, ctx: &Context<'_>, id: ID) -> GraphQLResult<bool> {
        let store = ctx.data::<CatalogStore>()?;
        Ok(store.delete_configuration(&actor(ctx), parse_id(&id)?).await?)
    }

    async fn delete_car(&self, ctx: &Context<'_>, id: ID) -> GraphQLResult<bool> {
        let store = ctx.data::<CatalogStore>()?;
        Ok(store.delete_car(&actor(ctx), parse_id(&id)?).await?)
    }

    /// Ingest a source file; without `path` the configured source is used.
    async fn ingest_source(&self, ctx: &Context<'_>, path: Option<String>) -> GraphQLResult<BatchReport> {
        let engine = ctx.data::<IngestionEngine>()?;
        let actor = actor(ctx);
        let report = match path {
            Some(p) => engine.ingest_file(&actor, &PathBuf::from(p)).await?,
            None => engine.ingest_default_source(&actor).await?,
        };
        Ok(report)
    }

    /// Recompute statistics now. Falls back to the last snapshot on failure.
    async fn refresh_statistics(&self, ctx: &Context<'_>) -> GraphQLResult<StatisticsView> {
        let aggregator = ctx.data::<StatisticsAggregator>()?;
        Ok(aggregator.refresh(&actor(ctx)).await?.into())
    }
}
