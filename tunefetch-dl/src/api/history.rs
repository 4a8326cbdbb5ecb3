//! Job history handlers
//!
//! GET /api/history, GET /api/history/:id, GET /api/history/:id/failed.csv

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::parse_job_id;
use crate::db::{failed_tracks_csv, HistoryStore, JobSummary};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

fn store(state: &AppState) -> ApiResult<&HistoryStore> {
    state
        .history
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("job history is disabled".to_string()))
}

async fn load_summary(state: &AppState, raw_id: &str) -> ApiResult<JobSummary> {
    let job_id = parse_job_id(raw_id)?;
    store(state)?
        .load(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no history for job {}", job_id)))
}

/// GET /api/history?limit=N
///
/// Most recently finished jobs first.
pub async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<JobSummary>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(store(&state)?.list(limit).await?))
}

/// GET /api/history/:id
pub async fn get_history(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSummary>> {
    Ok(Json(load_summary(&state, &job_id).await?))
}

/// GET /api/history/:id/failed.csv
///
/// Failed units as CSV, for re-submitting elsewhere.
pub async fn failed_tracks(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let summary = load_summary(&state, &job_id).await?;
    let disposition = format!("attachment; filename=\"failed_tracks_{}.csv\"", summary.job_id);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        failed_tracks_csv(&summary),
    ))
}

/// Build history routes
pub fn history_routes() -> Router<AppState> {
    Router::new()
        .route("/api/history", get(list_history))
        .route("/api/history/:id", get(get_history))
        .route("/api/history/:id/failed.csv", get(failed_tracks))
}
