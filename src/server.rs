//! Read-only HTTP API over the index.
//!
//! The only mutating routes trigger reconciliation; they never write
//! records directly.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check with store counts |
//! | `GET`  | `/projects` | Project records, optionally `?status=` |
//! | `GET`  | `/projects/{id}` | One record with its linked exports |
//! | `GET`  | `/projects/{id}/similar` | Nearest projects, `?k=&min_score=` |
//! | `GET`  | `/duplicates` | Duplicate clusters |
//! | `GET`  | `/exports` | Export records, `?orphans=true` for unmatched |
//! | `POST` | `/locations/{id}/rescan` | Full scan of one location |
//! | `POST` | `/rescan` | Reconcile one path: `{"path": "..."}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no project with id ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser UI on
//! another port can read the index.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use liveset_core::models::{ExportRecord, ProjectRecord, ProjectStatus};
use liveset_core::similarity::{DuplicateCluster, SimilarMatch};
use liveset_core::store::{ProjectFilter, StoreCounts};

use crate::analysis::{self, SimilarityPass};
use crate::error::LookupError;
use crate::indexer::{Indexer, ScanSummary};
use crate::linker;
use crate::progress::NoProgress;
use crate::scan;
use crate::watch;

#[derive(Clone)]
struct AppState {
    indexer: Indexer,
    pass: SimilarityPass,
}

/// Builds the router without binding a socket.
pub fn router(indexer: Indexer) -> Router {
    let state = AppState {
        pass: SimilarityPass::new(&indexer),
        indexer,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/projects", get(handle_list_projects))
        .route("/projects/{id}", get(handle_get_project))
        .route("/projects/{id}/similar", get(handle_similar))
        .route("/duplicates", get(handle_duplicates))
        .route("/exports", get(handle_exports))
        .route("/locations/{id}/rescan", post(handle_rescan_location))
        .route("/rescan", post(handle_rescan_path))
        .layer(cors)
        .with_state(state)
}

/// Serves the API on `[server].bind` until ctrl-c or indexer shutdown.
/// With `[watch].enabled` the change watcher runs alongside.
pub async fn run_server(indexer: Indexer) -> anyhow::Result<()> {
    let bind_addr = indexer.config().server.bind.clone();

    let watcher = if indexer.config().watch.enabled {
        let ix = indexer.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = watch::run(ix).await {
                error!(error = %e, "watcher stopped");
            }
        }))
    } else {
        None
    };

    let app = router(indexer.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "server listening");
    println!("lsi server listening on http://{}", bind_addr);

    let shutdown = indexer.shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = shutdown.cancelled() => {}
            }
        })
        .await?;

    indexer.shutdown();
    if let Some(handle) = watcher {
        let _ = handle.await;
    }
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
    code: String,
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{:#}", err),
    }
}

/// Maps [`LookupError`]s raised by the library to client errors;
/// everything else is internal.
fn classify(err: anyhow::Error) -> AppError {
    if let Some(lookup) = err.downcast_ref::<LookupError>() {
        return if lookup.is_not_found() {
            not_found(lookup.to_string())
        } else {
            bad_request(lookup.to_string())
        };
    }
    internal(err)
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| bad_request(format!("invalid id: {}", raw)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    counts: StoreCounts,
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let counts = state.indexer.store().counts().await.map_err(internal)?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        counts,
    }))
}

// ============ GET /projects ============

#[derive(Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn handle_list_projects(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ProjectRecord>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ProjectStatus>)
        .transpose()
        .map_err(|e| bad_request(e.to_string()))?;
    let filter = ProjectFilter {
        status,
        ..Default::default()
    };
    let records = state
        .indexer
        .store()
        .list_projects(&filter)
        .await
        .map_err(internal)?;
    Ok(Json(records))
}

// ============ GET /projects/{id} ============

#[derive(Serialize)]
struct ProjectResponse {
    project: ProjectRecord,
    exports: Vec<ExportRecord>,
}

async fn handle_get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProjectResponse>, AppError> {
    let id = parse_id(&id)?;
    let store = state.indexer.store();
    let project = store
        .get_project(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no project with id {}", id)))?;
    let exports = store.exports_for_project(id).await.map_err(internal)?;
    Ok(Json(ProjectResponse { project, exports }))
}

// ============ GET /projects/{id}/similar ============

#[derive(Deserialize)]
struct SimilarQuery {
    k: Option<usize>,
    min_score: Option<f64>,
}

async fn handle_similar(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SimilarQuery>,
) -> Result<Json<Vec<SimilarMatch>>, AppError> {
    let id = parse_id(&id)?;
    let defaults = &state.indexer.config().similarity;
    let k = query.k.unwrap_or(defaults.default_k);
    let min_score = query.min_score.unwrap_or(defaults.default_min_score);
    if !(0.0..=1.0).contains(&min_score) {
        return Err(bad_request("min_score must be in [0.0, 1.0]"));
    }
    let matches = analysis::similar(&state.indexer, id, k, min_score)
        .await
        .map_err(classify)?;
    Ok(Json(matches))
}

// ============ GET /duplicates ============

async fn handle_duplicates(
    State(state): State<AppState>,
) -> Result<Json<Vec<DuplicateCluster>>, AppError> {
    let clusters = analysis::duplicates(&state.indexer).await.map_err(internal)?;
    Ok(Json(clusters))
}

// ============ GET /exports ============

#[derive(Deserialize)]
struct ExportsQuery {
    #[serde(default)]
    orphans: bool,
}

async fn handle_exports(
    State(state): State<AppState>,
    Query(query): Query<ExportsQuery>,
) -> Result<Json<Vec<ExportRecord>>, AppError> {
    let exports = state
        .indexer
        .store()
        .list_exports(query.orphans)
        .await
        .map_err(internal)?;
    Ok(Json(exports))
}

// ============ POST /locations/{id}/rescan ============

async fn handle_rescan_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScanSummary>, AppError> {
    let id = parse_id(&id)?;
    let summary = scan::rescan_location(
        &state.indexer,
        id,
        Arc::new(NoProgress),
        &state.indexer.shutdown_token(),
    )
    .await
    .map_err(classify)?;
    refresh_in_background(&state, &summary);
    Ok(Json(summary))
}

// ============ POST /rescan ============

#[derive(Deserialize)]
struct RescanRequest {
    path: String,
}

async fn handle_rescan_path(
    State(state): State<AppState>,
    Json(req): Json<RescanRequest>,
) -> Result<Json<ScanSummary>, AppError> {
    if req.path.trim().is_empty() {
        return Err(bad_request("path must not be empty"));
    }
    let summary = state
        .indexer
        .rescan_single(std::path::Path::new(&req.path))
        .await
        .map_err(classify)?;
    linker::link_for_path(&state.indexer, std::path::Path::new(&req.path))
        .await
        .map_err(internal)?;
    refresh_in_background(&state, &summary);
    Ok(Json(summary))
}

fn refresh_in_background(state: &AppState, summary: &ScanSummary) {
    if summary.mutations() == 0 {
        return;
    }
    let indexer = state.indexer.clone();
    let pass = state.pass.clone();
    tokio::spawn(async move {
        if let Err(e) = pass.try_run(&indexer).await {
            error!(error = %e, "similarity pass failed");
        }
    });
}
