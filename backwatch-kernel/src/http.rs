/**
 * API REST BACKWATCH - Serveur HTTP du kernel
 *
 * RÔLE :
 * Vues en lecture seule sur les statuts de sauvegarde évalués par le moteur
 * de corrélation, plus un déclencheur de recalcul.
 *
 * ROUTES :
 * - GET  /health                → "ok" (sans auth)
 * - GET  /system/health         → uptime, rafraîchissements, stats moteur
 * - GET  /backups               → lignes filtrées/triées (query = ActiveFilters)
 * - GET  /backups/all           → tous les statuts, non filtrés
 * - GET  /backups/summary?date= → agrégat journalier
 * - GET  /backups/diagnostics   → enregistrements rejetés / ambigus
 * - POST /recompute?force=      → relit le fichier d'entrées et recalcule
 *
 * ERREURS :
 * - pas encore de données → 503 {"state":"loading"}
 * - date ou filtre invalide → 400
 *
 * SÉCURITÉ :
 * Header x-api-key obligatoire sur toutes routes sauf /health.
 */

use crate::health::{HealthTracker, KernelHealth};
use crate::source::InputSource;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use backwatch_core::filters::parse_date;
use backwatch_core::namespace::{InstanceFilter, NamespaceSelection};
use backwatch_core::summary::summarize;
use backwatch_core::{
    ActiveFilters, CoreError, CorrelationEngine, DateScopedSummary, Diagnostics, Evaluation, FilterError,
    GuestBackupStatus,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("inputs not loaded yet")]
    Loading,
    #[error(transparent)]
    BadRequest(#[from] FilterError),
    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NoData => ApiError::Loading,
            other => ApiError::Internal(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Loading => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({ "state": "loading" }))).into_response()
            }
            ApiError::BadRequest(e) => {
                (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
            }
            ApiError::Internal(e) => {
                warn!(error = %format!("{e:#}"), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": format!("{e:#}") })))
                    .into_response()
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CorrelationEngine>,
    pub source: InputSource,
    pub health_tracker: HealthTracker,
    /// Clé attendue dans x-api-key. `None` → tout accès refusé
    pub api_key: Option<Arc<str>>,
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    // Health check toujours accessible
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let Some(expected) = app.api_key.as_deref() else {
        warn!("BACKWATCH_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);

    if !ok {
        warn!(path = req.uri().path(), "rejected request without valid api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/backups", get(get_backups))
        .route("/backups/all", get(get_all_backups))
        .route("/backups/summary", get(get_summary))
        .route("/backups/diagnostics", get(get_diagnostics))
        .route("/recompute", post(recompute))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

#[derive(Serialize)]
struct BackupsView {
    generated_at: String, // format RFC3339
    fingerprint: String,
    total_guests: usize,
    filters: ActiveFilters,
    rows: Vec<GuestBackupStatus>,
}

#[derive(Serialize)]
struct SummaryView {
    generated_at: String,
    summary: DateScopedSummary,
}

#[derive(Serialize)]
struct DiagnosticsView {
    generated_at: String,
    fingerprint: String,
    diagnostics: Diagnostics,
}

#[derive(Serialize)]
struct RecomputeView {
    generated_at: String,
    fingerprint: String,
    guests: usize,
    reloaded: bool,
    recomputations: u64,
}

#[derive(Debug, Deserialize)]
struct SummaryParams {
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecomputeParams {
    #[serde(default)]
    force: bool,
}

fn rfc3339(eval: &Evaluation) -> String {
    eval.generated_at.format(&Rfc3339).unwrap_or_default()
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.engine))
}

// GET /backups (filtres en query string)
async fn get_backups(
    State(app): State<AppState>,
    Query(filters): Query<ActiveFilters>,
) -> Result<Json<BackupsView>, ApiError> {
    // le moteur tolère les filtres invalides, l'API les refuse
    NamespaceSelection::parse(&filters.namespace)?;
    InstanceFilter::parse(&filters.archive_instance)?;
    filters.date()?;

    let eval = app.engine.view(&filters)?;
    Ok(Json(BackupsView {
        generated_at: rfc3339(&eval),
        fingerprint: eval.fingerprint.clone(),
        total_guests: eval.statuses.len(),
        filters: eval.filters.clone(),
        rows: eval.rows.clone(),
    }))
}

// GET /backups/all
async fn get_all_backups(State(app): State<AppState>) -> Result<Json<Vec<GuestBackupStatus>>, ApiError> {
    let eval = app.engine.recompute(false)?;
    Ok(Json(eval.statuses.clone()))
}

// GET /backups/summary?date=YYYY-MM-DD
async fn get_summary(
    State(app): State<AppState>,
    Query(params): Query<SummaryParams>,
) -> Result<Json<SummaryView>, ApiError> {
    let date = params
        .date
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(parse_date)
        .transpose()?;

    let eval = app.engine.recompute(false)?;
    Ok(Json(SummaryView { generated_at: rfc3339(&eval), summary: summarize(&eval.statuses, date) }))
}

// GET /backups/diagnostics
async fn get_diagnostics(State(app): State<AppState>) -> Result<Json<DiagnosticsView>, ApiError> {
    let eval = match app.engine.latest() {
        Some(eval) => eval,
        None => app.engine.recompute(false)?,
    };
    Ok(Json(DiagnosticsView {
        generated_at: rfc3339(&eval),
        fingerprint: eval.fingerprint.clone(),
        diagnostics: eval.diagnostics.clone(),
    }))
}

// POST /recompute?force=true|false
async fn recompute(
    State(app): State<AppState>,
    Query(params): Query<RecomputeParams>,
) -> Result<Json<RecomputeView>, ApiError> {
    let reloaded = match app.source.reload(&app.engine, true).await {
        Ok(reloaded) => reloaded,
        Err(e) => {
            app.health_tracker.mark_failed(format!("{e:#}"));
            return Err(ApiError::Internal(e));
        }
    };
    let eval = app.engine.recompute(params.force)?;
    app.health_tracker.mark_refreshed();

    Ok(Json(RecomputeView {
        generated_at: rfc3339(&eval),
        fingerprint: eval.fingerprint.clone(),
        guests: eval.statuses.len(),
        reloaded,
        recomputations: app.engine.stats().recomputations,
    }))
}
