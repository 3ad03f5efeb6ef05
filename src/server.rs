//! HTTP API server.
//!
//! Exposes the orchestration core as a JSON HTTP API. All handlers go
//! through the [`Orchestrator`] facade; no route touches the store or the
//! adapters directly.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/v1/analysis/trigger` | Submit an analysis request |
//! | `GET`  | `/api/v1/analysis/jobs/{job_id}` | Full job record |
//! | `POST` | `/api/v1/analysis/jobs/{job_id}/cancel` | Request cancellation |
//! | `POST` | `/api/v1/analysis/insights` | Ad-hoc insight generation |
//! | `POST` | `/api/v1/analysis/rationale` | Ad-hoc rationale generation |
//! | `POST` | `/api/v1/analysis/health-score` | Latest health score |
//! | `POST` | `/api/v1/embeddings/generate` | Embed a single text into a record |
//! | `POST` | `/api/v1/embeddings/batch` | Embed a batch of texts |
//! | `POST` | `/api/v1/embeddings/search` | Semantic search |
//! | `GET`  | `/health` | Liveness check |
//! | `GET`  | `/ready` | Readiness (pings store, index, inference) |
//!
//! # Error Contract
//!
//! Every error response carries a machine-readable code:
//!
//! ```json
//! { "error": { "code": "backpressure", "message": "analysis queue is full, retry later" } }
//! ```
//!
//! Codes: `validation` (400), `not_found` (404), `backpressure` (429),
//! `rate_limited` (429), `upstream_unavailable` (502), `upstream_rejected`
//! (502), `storage` (503).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! dashboards.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{AnalysisKind, AnalysisRequest, EmbeddingRecord, SearchHit};
use crate::orchestrator::Orchestrator;

/// Run the server until the process receives SIGINT, then drain in-flight
/// jobs before returning.
pub async fn run_server(orchestrator: Arc<Orchestrator>, bind: &str) -> anyhow::Result<()> {
    let app = router(orchestrator.clone());

    println!("archlens listening on http://{}", bind);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    orchestrator.shutdown().await;
    Ok(())
}

/// Build the application router. Split out from [`run_server`] so tests can
/// drive it without a socket.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/analysis/trigger", post(handle_trigger))
        .route("/api/v1/analysis/jobs/{job_id}", get(handle_status))
        .route(
            "/api/v1/analysis/jobs/{job_id}/cancel",
            post(handle_cancel),
        )
        .route("/api/v1/analysis/insights", post(handle_insights))
        .route("/api/v1/analysis/rationale", post(handle_rationale))
        .route(
            "/api/v1/analysis/health-score",
            post(handle_health_score),
        )
        .route("/api/v1/embeddings/generate", post(handle_embed_one))
        .route("/api/v1/embeddings/batch", post(handle_embed_batch))
        .route("/api/v1/embeddings/search", post(handle_search))
        .route("/health", get(handle_health))
        .route("/ready", get(handle_ready))
        .layer(cors)
        .with_state(orchestrator)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Wrapper mapping [`CoreError`] variants onto HTTP status codes.
#[derive(Debug)]
struct AppError(CoreError);

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Backpressure(_) | CoreError::RateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            CoreError::UpstreamUnavailable(_) | CoreError::UpstreamRejected(_) => {
                StatusCode::BAD_GATEWAY
            }
            CoreError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let code = match &self.0 {
            CoreError::Validation(_) => "validation",
            CoreError::NotFound(_) => "not_found",
            CoreError::Backpressure(_) => "backpressure",
            CoreError::RateLimited { .. } => "rate_limited",
            CoreError::UpstreamUnavailable(_) => "upstream_unavailable",
            CoreError::UpstreamRejected(_) => "upstream_rejected",
            CoreError::Storage(_) => "storage",
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// ============ POST /api/v1/analysis/trigger ============

#[derive(Serialize)]
struct TriggerResponse {
    job_id: Uuid,
    status: String,
    repository_id: String,
    analysis_kind: AnalysisKind,
    created_at: DateTime<Utc>,
    deduplicated: bool,
}

/// Returns `202 Accepted` for both fresh and deduplicated triggers; the
/// `deduplicated` flag tells the caller which happened.
async fn handle_trigger(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<AnalysisRequest>,
) -> Result<(StatusCode, Json<TriggerResponse>), AppError> {
    let trigger = orchestrator.trigger(request).await?;
    let job = orchestrator.get_status(trigger.job_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            job_id: trigger.job_id,
            status: job.status.as_str().to_string(),
            repository_id: job.request.repository_id,
            analysis_kind: job.request.analysis_kind,
            created_at: job.created_at,
            deduplicated: trigger.deduplicated,
        }),
    ))
}

// ============ GET /api/v1/analysis/jobs/{job_id} ============

async fn handle_status(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let job = orchestrator.get_status(job_id).await?;
    Ok(Json(serde_json::to_value(&job).map_err(|e| {
        CoreError::Storage(format!("encode job: {}", e))
    })?))
}

// ============ POST /api/v1/analysis/jobs/{job_id}/cancel ============

async fn handle_cancel(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let job = orchestrator.cancel(job_id).await?;
    Ok(Json(serde_json::json!({
        "job_id": job.job_id,
        "status": job.status.as_str(),
    })))
}

// ============ POST /api/v1/analysis/insights ============

#[derive(Deserialize)]
struct SnippetRequest {
    code: String,
    #[serde(default = "default_language")]
    language: String,
    /// Free-form context forwarded to the model prompt, e.g. surrounding
    /// module names or the repository the snippet came from.
    #[serde(default)]
    context: Option<serde_json::Value>,
}

fn default_language() -> String {
    "text".to_string()
}

async fn handle_insights(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<SnippetRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bundle = orchestrator
        .generate_insights(&request.code, &request.language, request.context.as_ref())
        .await?;
    Ok(Json(serde_json::json!({
        "insights": bundle.insights,
        "model": bundle.model,
        "tokens_used": bundle.tokens_used,
    })))
}

// ============ POST /api/v1/analysis/rationale ============

async fn handle_rationale(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<SnippetRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let rationale = orchestrator
        .generate_rationale(&request.code, &request.language)
        .await?;
    Ok(Json(serde_json::to_value(&rationale).map_err(|e| {
        CoreError::Storage(format!("encode rationale: {}", e))
    })?))
}

// ============ POST /api/v1/analysis/health-score ============

#[derive(Deserialize)]
struct HealthScoreRequest {
    repository_id: String,
}

async fn handle_health_score(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<HealthScoreRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let score = orchestrator.health_score(&request.repository_id).await?;
    Ok(Json(serde_json::to_value(&score).map_err(|e| {
        CoreError::Storage(format!("encode health score: {}", e))
    })?))
}

// ============ POST /api/v1/embeddings/generate ============

#[derive(Deserialize)]
struct EmbedOneRequest {
    text: String,
    #[serde(default)]
    repository_id: Option<String>,
    #[serde(default)]
    source_id: Option<String>,
    /// Optional model name; must match the configured embedding model.
    #[serde(default)]
    model: Option<String>,
}

async fn handle_embed_one(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<EmbedOneRequest>,
) -> Result<Json<EmbeddingRecord>, AppError> {
    let record = orchestrator
        .generate_embedding(
            &request.text,
            request.repository_id.as_deref(),
            request.source_id,
            request.model.as_deref(),
        )
        .await?;
    Ok(Json(record))
}

// ============ POST /api/v1/embeddings/batch ============

async fn handle_embed_batch(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(texts): Json<Vec<String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let vectors = orchestrator.generate_embeddings(&texts).await?;
    Ok(Json(serde_json::json!({
        "count": vectors.len(),
        "embeddings": vectors,
    })))
}

// ============ POST /api/v1/embeddings/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    repository_id: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default)]
    threshold: f32,
}

fn default_top_k() -> usize {
    10
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    results: Vec<SearchHit>,
    total: usize,
}

async fn handle_search(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let results = orchestrator
        .semantic_search(
            &request.query,
            &request.repository_id,
            request.top_k,
            request.threshold,
        )
        .await?;
    Ok(Json(SearchResponse {
        total: results.len(),
        query: request.query,
        results,
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Liveness only; readiness lives at `/ready`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /ready ============

/// Returns `200` when every backing dependency answers its ping, `503`
/// otherwise. The component flags are always included.
async fn handle_ready(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let readiness = orchestrator.readiness().await;
    let status = if readiness.ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "ready": readiness.ok(),
            "components": readiness,
        })),
    )
}
