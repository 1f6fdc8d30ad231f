//! JSON HTTP API.
//!
//! A thin boundary over [`Services`]: handlers deserialize the request,
//! call the core, and serialize the result. Input validation lives in the
//! core, so the CLI and the API reject the same things.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask` | Answer a question from indexed documents |
//! | `POST` | `/search` | Ranked passages with a quality summary |
//! | `POST` | `/documents` | Index one document given inline |
//! | `GET`  | `/documents/{id}` | Fetch an indexed chunk |
//! | `POST` | `/admin/load-documents` | Ingest a directory of `.txt` files |
//! | `POST` | `/evaluation/evaluate` | Score a batch of interactions |
//! | `GET`  | `/evaluation/report` | Score statistics for a time window |
//! | `GET`  | `/evaluation/interactions` | Paginated interaction log |
//! | `POST` | `/evaluation/interactions/{id}/feedback` | Record a 1–5 rating |
//! | `GET`  | `/evaluation/stats` | Coverage overview |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "validation_error", "message": "invalid question: ..." } }
//! ```
//!
//! `validation_error` maps to 400, `not_found` to 404, every other code
//! to 500.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::error::PipelineError;
use crate::evaluation::{EvaluationReport, InteractionPage, QualityReport, StatsOverview};
use crate::ingest::IngestReport;
use crate::pipeline::{
    AddDocumentResponse, AskResponse, NewDocument, SearchResponse, Services, StoredChunk,
};

type AppState = Arc<Services>;

/// Build the router over already-wired services.
pub fn router(services: Arc<Services>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ask", post(handle_ask))
        .route("/search", post(handle_search))
        .route("/documents", post(handle_add_document))
        .route("/documents/{id}", get(handle_get_document))
        .route("/admin/load-documents", post(handle_load_documents))
        .route("/evaluation/evaluate", post(handle_evaluate))
        .route("/evaluation/report", get(handle_report))
        .route("/evaluation/interactions", get(handle_interactions))
        .route(
            "/evaluation/interactions/{id}/feedback",
            post(handle_feedback),
        )
        .route("/evaluation/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(services)
}

/// Serve the API on `bind` until the process is terminated.
pub async fn run_server(services: Services, bind: &str) -> anyhow::Result<()> {
    let app = router(Arc::new(services));

    tracing::info!(bind, "ragq server listening");
    println!("ragq server listening on http://{}", bind);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
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

/// A [`PipelineError`] on its way out as an HTTP response.
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Validation { .. } => StatusCode::BAD_REQUEST,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ask, POST /search ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    max_documents: Option<usize>,
    category: Option<String>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> ApiResult<AskResponse> {
    let response = state
        .pipeline
        .ask(&req.question, req.max_documents, req.category.as_deref())
        .await?;
    Ok(Json(response))
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    limit: Option<usize>,
    category: Option<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<SearchResponse> {
    let response = state
        .pipeline
        .search(&req.query, req.limit, req.category.as_deref())
        .await?;
    Ok(Json(response))
}

// ============ /documents ============

async fn handle_add_document(
    State(state): State<AppState>,
    Json(doc): Json<NewDocument>,
) -> ApiResult<AddDocumentResponse> {
    Ok(Json(state.add_document(doc).await?))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StoredChunk> {
    Ok(Json(state.get_chunk(&id).await?))
}

// ============ POST /admin/load-documents ============

#[derive(Deserialize)]
struct LoadRequest {
    directory: PathBuf,
    #[serde(default)]
    dry_run: bool,
}

async fn handle_load_documents(
    State(state): State<AppState>,
    Json(req): Json<LoadRequest>,
) -> ApiResult<IngestReport> {
    Ok(Json(state.load_documents(&req.directory, req.dry_run).await?))
}

// ============ /evaluation ============

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct EvaluateRequest {
    interaction_ids: Option<Vec<String>>,
    limit: Option<usize>,
    #[serde(default = "default_true")]
    include_trends: bool,
}

async fn handle_evaluate(
    State(state): State<AppState>,
    Json(req): Json<EvaluateRequest>,
) -> ApiResult<EvaluationReport> {
    let report = state
        .evaluation
        .evaluate(req.interaction_ids, req.limit, req.include_trends)
        .await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct ReportParams {
    days: Option<i64>,
}

async fn handle_report(
    State(state): State<AppState>,
    Query(params): Query<ReportParams>,
) -> ApiResult<QualityReport> {
    let report = state.evaluation.quality_report(params.days).await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct ListParams {
    limit: Option<usize>,
    offset: Option<usize>,
    #[serde(default)]
    scored_only: bool,
}

async fn handle_interactions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<InteractionPage> {
    let page = state
        .evaluation
        .list_interactions(
            params.limit.unwrap_or(20),
            params.offset.unwrap_or(0),
            params.scored_only,
        )
        .await?;
    Ok(Json(page))
}

#[derive(Deserialize)]
struct FeedbackRequest {
    rating: i64,
}

#[derive(Serialize)]
struct FeedbackResponse {
    interaction_id: String,
    rating: i64,
    status: &'static str,
}

async fn handle_feedback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FeedbackRequest>,
) -> ApiResult<FeedbackResponse> {
    state.pipeline.submit_feedback(&id, req.rating).await?;
    Ok(Json(FeedbackResponse {
        interaction_id: id,
        rating: req.rating,
        status: "recorded",
    }))
}

async fn handle_stats(State(state): State<AppState>) -> ApiResult<StatsOverview> {
    Ok(Json(state.evaluation.stats_overview().await?))
}
