//! Server-Sent Events stream of job progress
//!
//! Every [`JobEvent`] is forwarded with its type as the SSE event name.
//! Polling `GET /api/jobs/:id` stays authoritative; a lagging client simply
//! misses events.

use crate::api::parse_job_id;
use crate::error::ApiResult;
use crate::events::JobEvent;
use crate::models::JobId;
use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct EventFilter {
    /// Only forward events of this job
    pub job_id: Option<String>,
}

fn wanted(filter: Option<JobId>, event: &JobEvent) -> bool {
    filter.map_or(true, |id| event.job_id() == id)
}

/// GET /api/jobs/events[?job_id=...]
pub async fn job_event_stream(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let job_filter = filter.job_id.as_deref().map(parse_job_id).transpose()?;
    info!(job_id = ?job_filter, "New SSE client connected to job events");

    let mut rx = state.events.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) if wanted(job_filter, &event) => {
                    let event_type = event.event_type();
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            yield Ok(Event::default().event(event_type).data(json));
                        }
                        Err(e) => {
                            warn!(event_type, error = %e, "SSE: Failed to serialize event");
                        }
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE: Client lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("SSE: Job event stream ended");
    };

    // Idle connections get a ": heartbeat" comment every 15s
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}
