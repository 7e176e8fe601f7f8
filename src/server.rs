//! HTTP server.
//!
//! Exposes the service operations as a small JSON API and runs the ingestion
//! scheduler alongside it.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health probe (store liveness, source status, version) |
//! | `POST` | `/ingest` | Start an ingestion cycle in the background (202) |
//! | `GET`  | `/commits?limit=&repository=` | Most recent commits with annotations |
//! | `GET`  | `/stats` | Store statistics |
//! | `POST` | `/analyze` | Annotate one commit message without storing it |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "limit must be between 1 and 1000" } }
//! ```
//!
//! Error codes: `bad_request` (400), `configuration_error` (400),
//! `store_error` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser dashboards can
//! read the API directly.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::analyzer::{analyze_or_neutral, HeuristicAnalyzer};
use crate::config::Config;
use crate::error::{ConfigurationError, StoreError};
use crate::models::{Annotation, Statistics, StoredCommit};
use crate::query::DEFAULT_LIMIT;
use crate::service::{HealthReport, IngestionService, TriggerAck};
use crate::store::MAX_LIST_LIMIT;

#[derive(Clone)]
struct AppState {
    service: IngestionService,
}

/// Build the router for `service`. Exposed so tests can serve it on an
/// ephemeral port.
pub fn router(service: IngestionService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ingest", post(handle_ingest))
        .route("/commits", get(handle_commits))
        .route("/stats", get(handle_stats))
        .route("/analyze", post(handle_analyze))
        .layer(cors)
        .with_state(AppState { service })
}

/// Starts the HTTP server and the ingestion scheduler.
///
/// Binds to `[server].bind` and runs until the process is terminated. A
/// missing source credential disables the scheduler but not the server.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = IngestionService::from_config(config).await?;

    let scheduler = service.spawn_scheduler(Duration::from_secs(config.ingest.interval_secs));
    if scheduler.is_some() {
        log::info!(
            "scheduler: ingesting {} every {}s",
            config.source.repository,
            config.ingest.interval_secs
        );
    }

    let app = router(service);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    log::info!("listening on http://{}", config.server.bind);
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

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<ConfigurationError> for AppError {
    fn from(err: ConfigurationError) -> Self {
        AppError {
            status: StatusCode::BAD_REQUEST,
            code: "configuration_error",
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        log::error!("{}", err);
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "store_error",
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

async fn handle_health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.service.run_health_probe().await)
}

// ============ POST /ingest ============

async fn handle_ingest(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<TriggerAck>), AppError> {
    let ack = state.service.trigger_ingestion_now()?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

// ============ GET /commits ============

#[derive(Debug, Deserialize)]
struct CommitsQuery {
    limit: Option<i64>,
    repository: Option<String>,
}

#[derive(Serialize)]
struct CommitsResponse {
    commits: Vec<StoredCommit>,
}

async fn handle_commits(
    State(state): State<AppState>,
    Query(params): Query<CommitsQuery>,
) -> Result<Json<CommitsResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(bad_request(format!(
            "limit must be between 1 and {}",
            MAX_LIST_LIMIT
        )));
    }

    let repository = params.repository.as_deref().filter(|r| !r.is_empty());
    let commits = state.service.get_commits(limit, repository).await?;
    Ok(Json(CommitsResponse { commits }))
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<Statistics>, AppError> {
    Ok(Json(state.service.get_statistics().await?))
}

// ============ POST /analyze ============

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    message: String,
}

#[derive(Serialize)]
struct AnalyzeResponse {
    analysis: Annotation,
    timestamp: DateTime<Utc>,
}

async fn handle_analyze(
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let Json(req) = body.map_err(|e| bad_request(e.body_text()))?;
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let analysis = analyze_or_neutral(&HeuristicAnalyzer::new(), &req.message);
    Ok(Json(AnalyzeResponse {
        analysis,
        timestamp: Utc::now(),
    }))
}
