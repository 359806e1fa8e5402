//! HTTP query API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/answer` | Answer a question: `{"query": "...", "language": "hi"}` |
//! | `POST` | `/rebuild` | Discard the index and rebuild it from the corpus |
//! | `GET`  | `/status` | Index state, counts, and staleness |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `generation_failed` (502),
//! `generation_timeout` (504), `internal` (500). A body that does not
//! parse as an answer request is a `bad_request`.
//!
//! A question the corpus does not cover is not an error: it answers `200`
//! with the strict fallback text and coverage `NONE`.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use guideline_rag_core::guardrail::RiskLevel;
use guideline_rag_core::models::Coverage;
use guideline_rag_core::RagError;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::engine::{Answer, Engine, Retrieved};
use crate::index_store::{BuildReport, IndexStatus};

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// Build the API router around a shared engine.
pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/answer", post(handle_answer))
        .route("/rebuild", post(handle_rebuild))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { engine })
}

/// Serve the API on `bind` until the process is terminated.
pub async fn run_server(engine: Arc<Engine>, bind: &str) -> anyhow::Result<()> {
    let app = router(engine);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("query API listening on http://{}", bind);
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
    code: &'static str,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            RagError::Generation(_) => (StatusCode::BAD_GATEWAY, "generation_failed"),
            RagError::GenerationTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "generation_timeout"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::warn!(code, error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: rejection.body_text(),
        }
    }
}

// ============ POST /answer ============

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub query: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

/// Wire form of an [`Answer`], shared with `grag ask --json`.
#[derive(Debug, Serialize)]
pub struct AnswerResponse {
    pub text: String,
    pub coverage: Coverage,
    pub retrieved: Vec<Retrieved>,
    pub risk: RiskLevel,
    pub evidence_reason: Option<&'static str>,
}

impl From<&Answer> for AnswerResponse {
    fn from(answer: &Answer) -> Self {
        Self {
            text: answer.text.clone(),
            coverage: answer.coverage,
            retrieved: answer.retrieved(),
            risk: answer.risk,
            evidence_reason: answer.evidence.map(|c| c.reason.as_str()),
        }
    }
}

async fn handle_answer(
    State(state): State<AppState>,
    payload: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, AppError> {
    let Json(request) = payload?;
    let answer = state
        .engine
        .answer(&request.query, &request.language)
        .await?;
    Ok(Json(AnswerResponse::from(&answer)))
}

// ============ POST /rebuild, GET /status ============

async fn handle_rebuild(State(state): State<AppState>) -> Result<Json<BuildReport>, AppError> {
    Ok(Json(state.engine.store().force_rebuild().await?))
}

async fn handle_status(State(state): State<AppState>) -> Result<Json<IndexStatus>, AppError> {
    Ok(Json(state.engine.store().status().await?))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
