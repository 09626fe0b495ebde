//! Admin HTTP API.
//!
//! Exposes discovery runs, the review queue, and statistics as JSON over
//! HTTP. Every `/api/*` route requires an admin bearer token (see
//! [`crate::auth`]); `/health` is open.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/discovery/run` | Start a discovery run |
//! | `GET`  | `/api/discovery/runs` | Run history |
//! | `GET`  | `/api/discovery/runs/{id}` | One run with its error log |
//! | `GET`  | `/api/discovery/grants` | Filtered, sorted review queue |
//! | `GET`  | `/api/discovery/grants/{id}` | One discovered grant |
//! | `POST` | `/api/discovery/grants/{id}/approve` | Approve and create a program |
//! | `POST` | `/api/discovery/grants/{id}/reject` | Reject with a reason |
//! | `POST` | `/api/discovery/grants/{id}/mark-duplicate` | Link to an existing program |
//! | `GET`  | `/api/discovery/stats` | Aggregate statistics |
//! | `GET`  | `/api/sources` | Configured sources |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_state", "message": "grant 'x' is already approved" } }
//! ```
//!
//! Codes: `validation_error` (400), `unauthorized` (401), `not_found` (404),
//! `invalid_state` (409), `fetch_error` (502), `internal` (500).

use axum::{
    extract::{Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{verify_token, AdminIdentity};
use crate::config::TriggerMode;
use crate::discovery::Pipeline;
use crate::error::DiscoveryError;
use crate::models::{DiscoveredGrant, DiscoveryRun, Program};
use crate::query::{self, GrantQuery, Page, RunQuery};
use crate::review::{self, ApproveOverrides};
use crate::sources::{get_sources, SourceStatus};
use crate::stats::{discovery_stats, DiscoveryStats};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
}

/// Builds the router. Split from [`run_server`] so tests can serve it on
/// their own listener.
pub fn router(pipeline: Pipeline) -> Router {
    let state = AppState { pipeline };

    let api = Router::new()
        .route("/api/discovery/run", post(handle_run))
        .route("/api/discovery/runs", get(handle_list_runs))
        .route("/api/discovery/runs/{id}", get(handle_get_run))
        .route("/api/discovery/grants", get(handle_list_grants))
        .route("/api/discovery/grants/{id}", get(handle_get_grant))
        .route("/api/discovery/grants/{id}/approve", post(handle_approve))
        .route("/api/discovery/grants/{id}/reject", post(handle_reject))
        .route(
            "/api/discovery/grants/{id}/mark-duplicate",
            post(handle_mark_duplicate),
        )
        .route("/api/discovery/stats", get(handle_stats))
        .route("/api/sources", get(handle_sources))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`, plus the discovery scheduler
/// when `[schedule].enabled` is set. Runs until the process is terminated.
pub async fn run_server(pipeline: Pipeline) -> anyhow::Result<()> {
    let config = pipeline.config.clone();
    if config
        .server
        .admin_secret
        .as_deref()
        .map_or(true, str::is_empty)
    {
        tracing::warn!("server.admin_secret is not set; every /api request will be rejected");
    }

    let _scheduler = if config.schedule.enabled {
        Some(crate::scheduler::start_scheduler(pipeline.clone()).await?)
    } else {
        None
    };

    let app = router(pipeline);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "grant discovery server listening");
    println!("Grant discovery server listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Errors ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Converts [`DiscoveryError`] into the JSON error contract.
struct AppError(DiscoveryError);

impl From<DiscoveryError> for AppError {
    fn from(err: DiscoveryError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DiscoveryError::Validation(_) => StatusCode::BAD_REQUEST,
            DiscoveryError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DiscoveryError::NotFound(_) => StatusCode::NOT_FOUND,
            DiscoveryError::InvalidState(_) => StatusCode::CONFLICT,
            DiscoveryError::Fetch { .. } => StatusCode::BAD_GATEWAY,
            DiscoveryError::Database(_) | DiscoveryError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.code().to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;

// ============ Auth ============

async fn require_admin(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let secret = state
        .pipeline
        .config
        .server
        .admin_secret
        .clone()
        .unwrap_or_default();

    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| DiscoveryError::Unauthorized("missing bearer token".to_string()))?;

    let admin = verify_token(&secret, token)?;
    req.extensions_mut().insert(admin);
    Ok(next.run(req).await)
}

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

// ============ Runs ============

#[derive(Debug, Deserialize)]
struct RunRequest {
    #[serde(default)]
    sources: Option<Vec<String>>,
    #[serde(default = "default_send_notification")]
    send_notification: bool,
}

fn default_send_notification() -> bool {
    true
}

/// Starts a run. Background mode answers `202` with the `running` run;
/// sync mode answers `200` with the closed run.
async fn handle_run(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Json(req): Json<RunRequest>,
) -> ApiResult<(StatusCode, Json<DiscoveryRun>)> {
    let pipeline = &state.pipeline;
    let specs = req
        .sources
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| pipeline.config.discovery.default_sources.clone());
    tracing::info!(admin = %admin.admin_id, sources = ?specs, "discovery run requested");

    match pipeline.config.discovery.trigger_mode {
        TriggerMode::Background => {
            let run = pipeline.spawn_run(&specs, req.send_notification).await?;
            Ok((StatusCode::ACCEPTED, Json(run)))
        }
        TriggerMode::Sync => {
            let run = pipeline.run_discovery(&specs, req.send_notification).await?;
            Ok((StatusCode::OK, Json(run)))
        }
    }
}

async fn handle_list_runs(
    State(state): State<AppState>,
    Query(params): Query<RunQuery>,
) -> ApiResult<Json<Page<DiscoveryRun>>> {
    let page = query::list_runs(
        &state.pipeline.pool,
        &params,
        state.pipeline.config.discovery.page_limit,
    )
    .await?;
    Ok(Json(page))
}

async fn handle_get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DiscoveryRun>> {
    Ok(Json(query::get_run(&state.pipeline.pool, &id).await?))
}

// ============ Grants ============

async fn handle_list_grants(
    State(state): State<AppState>,
    Query(params): Query<GrantQuery>,
) -> ApiResult<Json<Page<DiscoveredGrant>>> {
    let filter = params.parse(state.pipeline.config.discovery.page_limit)?;
    Ok(Json(query::list_grants(&state.pipeline.pool, &filter).await?))
}

async fn handle_get_grant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DiscoveredGrant>> {
    Ok(Json(query::get_grant(&state.pipeline.pool, &id).await?))
}

#[derive(Serialize)]
struct ApproveResponse {
    grant_id: String,
    program: Program,
}

async fn handle_approve(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(id): Path<String>,
    Json(overrides): Json<ApproveOverrides>,
) -> ApiResult<(StatusCode, Json<ApproveResponse>)> {
    let program = review::approve(&state.pipeline.pool, &id, &admin.admin_id, overrides).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApproveResponse {
            grant_id: id,
            program,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct RejectRequest {
    #[serde(default)]
    reason: String,
}

async fn handle_reject(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(id): Path<String>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<Json<DiscoveredGrant>> {
    let grant = review::reject(&state.pipeline.pool, &id, &admin.admin_id, &req.reason).await?;
    Ok(Json(grant))
}

#[derive(Debug, Deserialize)]
struct MarkDuplicateRequest {
    #[serde(default)]
    program_key: String,
    #[serde(default)]
    notes: Option<String>,
}

async fn handle_mark_duplicate(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(id): Path<String>,
    Json(req): Json<MarkDuplicateRequest>,
) -> ApiResult<Json<DiscoveredGrant>> {
    let grant = review::mark_duplicate(
        &state.pipeline.pool,
        &id,
        &admin.admin_id,
        &req.program_key,
        req.notes.as_deref(),
    )
    .await?;
    Ok(Json(grant))
}

// ============ Stats and sources ============

async fn handle_stats(State(state): State<AppState>) -> ApiResult<Json<DiscoveryStats>> {
    Ok(Json(discovery_stats(&state.pipeline.pool).await?))
}

#[derive(Serialize)]
struct SourcesResponse {
    sources: Vec<SourceStatus>,
}

async fn handle_sources(State(state): State<AppState>) -> Json<SourcesResponse> {
    Json(SourcesResponse {
        sources: get_sources(&state.pipeline.config),
    })
}
