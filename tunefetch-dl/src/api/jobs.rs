//! Job submission and status handlers
//!
//! POST /api/jobs, GET /api/jobs, GET /api/jobs/:id, POST /api/jobs/:id/cancel

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::{parse_job_id, sse::job_event_stream};
use crate::error::ApiResult;
use crate::models::{JobId, JobSnapshot, JobState, RequestKind};
use crate::services::SubmitOptions;
use crate::AppState;

/// POST /api/jobs request
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    /// Free-form text: URL, pasted list, search or description
    pub input: String,
    /// Name for pasted track lists
    #[serde(default)]
    pub playlist_name: Option<String>,
    /// Track count for vibe descriptions
    #[serde(default)]
    pub num_tracks: Option<usize>,
}

/// POST /api/jobs response
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub kind: RequestKind,
    pub state: JobState,
    pub total_units: usize,
    pub playlist_name: Option<String>,
    pub warnings: Vec<String>,
}

/// POST /api/jobs/:id/cancel response
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub job_id: JobId,
    pub state: JobState,
}

/// POST /api/jobs
///
/// Classifies and expands the input, then returns 202 Accepted while the
/// units download in the background.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let classified = state.classifier.classify(&request.input);
    let kind = classified.kind();
    tracing::info!(kind = kind.as_str(), "Job submission received");

    let options = SubmitOptions {
        playlist_name: request.playlist_name,
        track_count: request.num_tracks,
    };

    let job_id = state.jobs.submit(classified, options).await?;
    let snapshot = state.jobs.get_status(job_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id,
            kind,
            state: snapshot.state,
            total_units: snapshot.progress.total,
            playlist_name: snapshot.playlist_name,
            warnings: snapshot.warnings,
        }),
    ))
}

/// GET /api/jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSnapshot>> {
    Json(state.jobs.list_jobs().await)
}

/// GET /api/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let job_id = parse_job_id(&job_id)?;
    Ok(Json(state.jobs.get_status(job_id).await?))
}

/// POST /api/jobs/:id/cancel
///
/// Idempotent: cancelling a finished job returns its terminal state.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelJobResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let job_state = state.jobs.cancel(job_id).await?;

    Ok(Json(CancelJobResponse {
        job_id,
        state: job_state,
    }))
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/api/jobs", post(submit_job).get(list_jobs))
        .route("/api/jobs/events", get(job_event_stream))
        .route("/api/jobs/:id", get(get_job))
        .route("/api/jobs/:id/cancel", post(cancel_job))
}
