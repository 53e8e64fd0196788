//! HTTP API endpoints

use crate::protocol;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use geoflux_core::query::{QueryResult, TimeseriesQuery};
use geoflux_core::segment::SegmentHandle;
use geoflux_core::storage::{EngineStats, StorageEngine};
use geoflux_core::{GeoFluxError, IndexSchema, InputRow};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state
pub type AppState = Arc<StorageEngine>;

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

/// Create the API router
pub fn create_router(engine: Arc<StorageEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health))
        .route("/ping", get(ping))
        // Data source management
        .route("/datasources", get(list_datasources))
        .route(
            "/datasources/:name",
            post(create_datasource).delete(drop_datasource),
        )
        // Ingestion
        .route("/datasources/:name/rows", post(append_rows))
        .route("/datasources/:name/write", post(write))
        .route("/datasources/:name/persist", post(persist))
        .route("/datasources/:name/compact", post(compact))
        // Query endpoint
        .route("/query", post(query))
        // Stats
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct AppendResponse {
    pub rows: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(e: GeoFluxError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        GeoFluxError::DataSourceNotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse { error: e.to_string() }))
}

/// Run an engine call on the blocking pool
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> geoflux_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| error_response(GeoFluxError::Internal(e.to_string())))?
        .map_err(error_response)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: geoflux_core::VERSION.to_string(),
    })
}

async fn ping() -> &'static str {
    "pong"
}

async fn list_datasources(State(engine): State<AppState>) -> Json<Vec<String>> {
    Json(engine.list_datasources())
}

async fn create_datasource(
    State(engine): State<AppState>,
    Path(name): Path<String>,
    Json(schema): Json<IndexSchema>,
) -> ApiResult<StatusCode> {
    blocking(move || engine.create_datasource(&name, schema)).await?;
    Ok(StatusCode::CREATED)
}

async fn drop_datasource(
    State(engine): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    blocking(move || engine.drop_datasource(&name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn append_rows(
    State(engine): State<AppState>,
    Path(name): Path<String>,
    Json(rows): Json<Vec<InputRow>>,
) -> ApiResult<Json<AppendResponse>> {
    let rows = blocking(move || engine.append(&name, &rows)).await?;
    Ok(Json(AppendResponse { rows }))
}

async fn write(
    State(engine): State<AppState>,
    Path(name): Path<String>,
    body: String,
) -> ApiResult<StatusCode> {
    let now = chrono::Utc::now().timestamp_millis();
    let rows = protocol::parse_rows(&body, now)
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: e })))?;

    blocking(move || engine.append(&name, &rows)).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn segment_id(handle: Option<SegmentHandle>) -> Json<Option<String>> {
    Json(handle.map(|h| h.id().to_string()))
}

async fn persist(
    State(engine): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Option<String>>> {
    let handle = blocking(move || {
        let ds = engine
            .get_datasource(&name)
            .ok_or(GeoFluxError::DataSourceNotFound(name))?;
        ds.persist()
    })
    .await?;
    Ok(segment_id(handle))
}

async fn compact(
    State(engine): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Option<String>>> {
    let handle = blocking(move || {
        let ds = engine
            .get_datasource(&name)
            .ok_or(GeoFluxError::DataSourceNotFound(name))?;
        ds.compact()
    })
    .await?;
    Ok(segment_id(handle))
}

async fn query(
    State(engine): State<AppState>,
    Json(query): Json<TimeseriesQuery>,
) -> ApiResult<Json<QueryResult>> {
    let result = blocking(move || engine.query(&query)).await?;
    Ok(Json(result.finalize()))
}

async fn stats(State(engine): State<AppState>) -> Json<EngineStats> {
    Json(engine.stats())
}

async fn metrics(State(engine): State<AppState>) -> String {
    let stats = engine.stats();

    // Prometheus format
    let mut output = String::new();
    output.push_str("# HELP geoflux_datasources_total Total number of data sources\n");
    output.push_str("# TYPE geoflux_datasources_total gauge\n");
    output.push_str(&format!("geoflux_datasources_total {}\n", stats.datasource_count));

    output.push_str("# HELP geoflux_rows_total Total number of ingested rows\n");
    output.push_str("# TYPE geoflux_rows_total gauge\n");
    output.push_str(&format!("geoflux_rows_total {}\n", stats.total_rows));

    output.push_str("# HELP geoflux_segments_total Total number of persisted segments\n");
    output.push_str("# TYPE geoflux_segments_total gauge\n");
    output.push_str(&format!("geoflux_segments_total {}\n", stats.total_segments));

    output.push_str("# HELP geoflux_storage_bytes_total Total storage size in bytes\n");
    output.push_str("# TYPE geoflux_storage_bytes_total gauge\n");
    output.push_str(&format!("geoflux_storage_bytes_total {}\n", stats.total_size_bytes));

    for ds in stats.datasources {
        output.push_str(&format!(
            "geoflux_datasource_rows{{datasource=\"{}\",state=\"live\"}} {}\n",
            ds.name, ds.live_rows
        ));
        output.push_str(&format!(
            "geoflux_datasource_rows{{datasource=\"{}\",state=\"persisted\"}} {}\n",
            ds.name, ds.segment_rows
        ));
        output.push_str(&format!(
            "geoflux_datasource_parse_errors{{datasource=\"{}\"}} {}\n",
            ds.name, ds.parse_errors
        ));
    }

    output
}
