use std::sync::Arc;

use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::ingestion::{DescriptorOutcome, IngestionEngine};
use crate::models::*;
use crate::schema::{build_schema, CatalogSchema};
use crate::statistics::{RefreshOutcome, StatisticsAggregator};

pub const SERVICE_NAME: &str = "Car Statistics API";
pub const SERVICE_VERSION: &str = "1.0";
pub const ACTOR_HEADER: &str = "x-actor";

#[derive(Clone)]
pub struct AppState {
    pub store: CatalogStore,
    pub engine: IngestionEngine,
    pub aggregator: StatisticsAggregator,
    pub cfg: Arc<Config>,
}

impl AppState {
    pub fn new(store: CatalogStore, cfg: Config) -> Self {
        let engine = IngestionEngine::new(store.clone(), cfg.clone());
        let aggregator = StatisticsAggregator::new(store.clone(), cfg.top_brands_limit);
        Self { store, engine, aggregator, cfg: Arc::new(cfg) }
    }

    pub fn schema(&self) -> CatalogSchema {
        build_schema(self.store.clone(), self.engine.clone(), self.aggregator.clone())
    }
}

pub fn router(state: AppState) -> Router {
    let schema = state.schema();
    Router::new()
        .route("/", get(directory))
        .route("/add/", post(add_cars))
        .route("/statistics/", get(statistics))
        .route("/health", get(health_check))
        .route("/graphql", get(graphql_playground).post(graphql_handler))
        .layer(Extension(schema))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wraps a payload in the service's standard `{metadata, data}` envelope.
pub fn envelope(status: StatusCode, message: impl Into<String>, data: Value) -> Response {
    let body = json!({
        "metadata": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "status": status.as_u16(),
            "message": message.into(),
            "service": SERVICE_NAME,
            "version": SERVICE_VERSION,
        },
        "data": data,
    });
    (status, Json(body)).into_response()
}

/// Error surface of the REST handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        let status = match &err {
            CatalogError::SourceNotFound(_) | CatalogError::InvalidDescriptor(_) => StatusCode::BAD_REQUEST,
            CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
            CatalogError::Conflict(_) => StatusCode::CONFLICT,
            CatalogError::StatisticsUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), error = %self.message, "Request failed");
        } else {
            tracing::warn!(status = self.status.as_u16(), error = %self.message, "Request rejected");
        }
        envelope(self.status, self.message, Value::Null)
    }
}

fn actor_from(headers: &HeaderMap) -> ActorContext {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ActorContext::user)
        .unwrap_or_default()
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false)
}

fn car_json(car: &Car) -> Value {
    json!({
        "id": car.id.map(|id| id.to_hex()),
        "model_id": car.model_id.to_hex(),
        "body_type_id": car.body_type_id.map(|id| id.to_hex()),
        "configuration_ids": car.configuration_ids.iter().map(|id| id.to_hex()).collect::<Vec<_>>(),
    })
}

async fn directory(headers: HeaderMap) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let base = format!("http://{}", host);
    envelope(
        StatusCode::OK,
        "Available endpoints",
        json!({
            "add": format!("{}/add/", base),
            "statistics": format!("{}/statistics/", base),
            "graphql": format!("{}/graphql", base),
            "health": format!("{}/health", base),
        }),
    )
}

/// `POST /add/`: a JSON body adds one vehicle; an empty body ingests the
/// configured source file.
async fn add_cars(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> std::result::Result<Response, ApiError> {
    let actor = actor_from(&headers);

    if body.iter().all(u8::is_ascii_whitespace) {
        let report = state.engine.ingest_default_source(&actor).await?;
        let data = serde_json::to_value(&report).map_err(CatalogError::from)?;
        return Ok(envelope(StatusCode::OK, "Source ingested", data));
    }

    if !is_json(&headers) {
        return Err(ApiError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Expected an application/json body or an empty body",
        ));
    }

    let value: Value =
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(format!("Invalid JSON: {}", e)))?;
    let descriptor = VehicleDescriptor::from_json(&value)
        .ok_or_else(|| ApiError::bad_request("Expected a JSON object with brand, model and body_type"))?;

    match state.engine.ingest_descriptor(&actor, &descriptor).await? {
        DescriptorOutcome::Created { car, .. } => Ok(envelope(StatusCode::CREATED, "Car created", car_json(&car))),
        DescriptorOutcome::Existing { car, .. } => Ok(envelope(StatusCode::OK, "Car already exists", car_json(&car))),
        DescriptorOutcome::Invalid { missing } => Err(ApiError::bad_request(format!(
            "Missing or empty required fields: {}",
            missing.join(", ")
        ))),
    }
}

async fn statistics(State(state): State<AppState>, headers: HeaderMap) -> std::result::Result<Response, ApiError> {
    let outcome = state.aggregator.refresh(&actor_from(&headers)).await?;
    let snapshot = outcome.snapshot();
    let data = serde_json::to_value(&snapshot.data).map_err(CatalogError::from)?;
    let response = match &outcome {
        RefreshOutcome::Fresh(_) => envelope(
            StatusCode::OK,
            "Statistics calculated",
            json!({ "data": data, "date_calculated": snapshot.created_at_rfc3339(), "stale": false }),
        ),
        RefreshOutcome::Stale { error, .. } => envelope(
            StatusCode::PARTIAL_CONTENT,
            "Serving last saved statistics",
            json!({
                "data": data,
                "date_calculated": snapshot.created_at_rfc3339(),
                "stale": true,
                "error": error,
            }),
        ),
    };
    Ok(response)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn graphql_playground() -> Html<String> {
    Html(async_graphql::http::playground_source(
        async_graphql::http::GraphQLPlaygroundConfig::new("/graphql"),
    ))
}

async fn graphql_handler(
    Extension(schema): Extension<CatalogSchema>,
    headers: HeaderMap,
    req: GraphQLRequest,
) -> GraphQLResponse {
    schema.execute(req.into_inner().data(actor_from(&headers))).await.into()
}
