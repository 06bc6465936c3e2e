//! HTTP API endpoints

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use metricstore_core::cache::{CacheEngine, CacheStatus};
use metricstore_core::protocol::{parse_numbered, LineError, TimePrecision};
use metricstore_core::query::{QueryRequest, QueryResponse};
use metricstore_core::StoreError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Application state
pub type AppState = Arc<CacheEngine>;

/// Create the API router
pub fn create_router(engine: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health))
        .route("/ping", get(ping))

        // Ingest (line protocol)
        .route("/api/put", post(put))

        // Query
        .route("/api/query", post(query))

        // Cache status
        .route("/api/cache", get(cache_status))
        .route("/metrics", get(metrics))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

// ============================================================================
// Errors
// ============================================================================

/// Handler failure
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] StoreError),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(
                StoreError::Query(_)
                | StoreError::InvalidFormat(_)
                | StoreError::OutOfOrderPoint { .. }
                | StoreError::Configuration(_),
            ) => StatusCode::BAD_REQUEST,
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PutParams {
    /// `s` or `ms`; milliseconds when absent
    precision: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct PutResponse {
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<LineError>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: metricstore_core::VERSION.to_string(),
    })
}

async fn ping() -> &'static str {
    "pong"
}

async fn put(
    State(engine): State<AppState>,
    Query(params): Query<PutParams>,
    body: String,
) -> Result<Response, ApiError> {
    let precision = match params.precision.as_deref() {
        None => TimePrecision::default(),
        Some(name) => TimePrecision::from_name(name)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown precision: {}", name)))?,
    };

    let mut success = 0;
    let mut errors = Vec::new();
    for (line, parsed) in parse_numbered(&body, precision) {
        match parsed.and_then(|metric| engine.store_metric(&metric)) {
            Ok(()) => success += 1,
            Err(e) => errors.push(LineError {
                line,
                error: e.to_string(),
            }),
        }
    }
    debug!("Stored {} points, {} failed", success, errors.len());

    if errors.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let response = PutResponse {
        success,
        failed: errors.len(),
        errors,
    };
    Ok((StatusCode::BAD_REQUEST, Json(response)).into_response())
}

async fn query(
    State(engine): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    Ok(Json(engine.query(&request)?))
}

async fn cache_status(State(engine): State<AppState>) -> Json<CacheStatus> {
    Json(engine.status())
}

async fn metrics(State(engine): State<AppState>) -> String {
    let status = engine.status();

    // Prometheus format
    let mut output = String::new();
    output.push_str("# HELP metricstore_series Series held in the cache\n");
    output.push_str("# TYPE metricstore_series gauge\n");
    output.push_str(&format!("metricstore_series {}\n", status.series));

    output.push_str("# HELP metricstore_points Points held in the cache\n");
    output.push_str("# TYPE metricstore_points gauge\n");
    output.push_str(&format!("metricstore_points {}\n", status.points));

    output.push_str("# HELP metricstore_compressed_bytes Compressed bytes held\n");
    output.push_str("# TYPE metricstore_compressed_bytes gauge\n");
    output.push_str(&format!("metricstore_compressed_bytes {}\n", status.size_bytes));

    let stats = status.stats;
    for (name, value) in [
        ("points_stored", stats.points_stored),
        ("points_rejected", stats.points_rejected),
        ("points_uncached", stats.points_uncached),
        ("series_evicted", stats.series_evicted),
        ("series_expired", stats.series_expired),
        ("blocks_aged_off", stats.blocks_aged_off),
    ] {
        output.push_str(&format!("# TYPE metricstore_{}_total counter\n", name));
        output.push_str(&format!("metricstore_{}_total {}\n", name, value));
    }

    output
}
