//! HTTP API handlers for tunefetch-dl
//!
//! Thin glue over the job manager and history store: JSON REST plus an SSE
//! stream of job events.

pub mod health;
pub mod history;
pub mod jobs;
pub mod sse;

pub use health::health_routes;
pub use history::history_routes;
pub use jobs::job_routes;
pub use sse::job_event_stream;

use crate::error::ApiError;
use crate::models::JobId;

/// Parse a job id path segment
pub(crate) fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid job id: {}", raw)))
}
