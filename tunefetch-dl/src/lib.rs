//! tunefetch-dl library interface
//!
//! Classifies free-form music requests, expands them into track units and
//! downloads those units on a bounded worker pool. Exposed as a library so
//! integration tests can drive it with fake collaborators.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod services;
pub mod types;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use crate::config::AcquisitionConfig;
use crate::db::HistoryStore;
use crate::events::EventBus;
use crate::services::{
    AcquirerSettings, Classifier, ExpanderSettings, JobManager, JobManagerSettings,
    TrackAcquirer, TrackListExpander, WorkQueue, WorkerPool,
};
use crate::types::{MediaFetcher, TagWriter, TracklistGenerator, Transcoder};
use axum::Router;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Events a slow SSE client may lag behind before losing the oldest
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub jobs: JobManager,
    pub classifier: Classifier,
    /// `None` when running without a history database
    pub history: Option<HistoryStore>,
    pub events: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(jobs: JobManager, classifier: Classifier) -> Self {
        Self {
            history: jobs.history().cloned(),
            events: jobs.events().clone(),
            jobs,
            classifier,
            startup_time: Utc::now(),
        }
    }
}

/// External tools the acquisition pipeline depends on
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn MediaFetcher>,
    pub transcoder: Arc<dyn Transcoder>,
    pub tagger: Arc<dyn TagWriter>,
    pub generator: Arc<dyn TracklistGenerator>,
}

/// A running job manager and the worker pool feeding it
pub struct Acquisition {
    pub jobs: JobManager,
    pub pool: WorkerPool,
}

/// Wire expander, job manager and worker pool together and start the workers.
///
/// `worker_count` overrides `settings.worker_count` when given. Cancelling
/// `shutdown` stops the workers after their current unit.
pub fn start_acquisition(
    settings: &AcquisitionConfig,
    worker_count: Option<usize>,
    collaborators: Collaborators,
    history: Option<HistoryStore>,
    shutdown: CancellationToken,
) -> Acquisition {
    let expander = TrackListExpander::new(
        Arc::clone(&collaborators.fetcher),
        Arc::clone(&collaborators.generator),
        ExpanderSettings {
            call_policy: settings.external_call_policy(),
            call_timeout: settings.external_call_timeout(),
            default_track_count: settings.vibe_track_count,
            default_playlist_name: settings.default_playlist_name.clone(),
        },
    );

    let (queue, receiver) = WorkQueue::channel();
    let jobs = JobManager::new(
        expander,
        queue,
        EventBus::new(EVENT_BUS_CAPACITY),
        history,
        JobManagerSettings {
            retry_policy: settings.unit_retry_policy(),
            expansion_timeout: settings.expansion_timeout(),
            download_root: settings.download_dir.clone(),
        },
    );

    let acquirer = TrackAcquirer::new(
        collaborators.fetcher,
        collaborators.transcoder,
        collaborators.tagger,
        AcquirerSettings {
            staging_dir: settings.staging_dir(),
            bitrate_kbps: settings.target_bitrate_kbps,
        },
    );

    let pool = WorkerPool::start(
        worker_count.unwrap_or(settings.worker_count),
        receiver,
        Arc::new(acquirer),
        Arc::new(jobs.clone()),
        shutdown,
    );

    Acquisition { jobs, pool }
}

/// Resolve a relative download directory against the root folder
pub fn resolve_download_dir(root_folder: &std::path::Path, download_dir: &std::path::Path) -> PathBuf {
    if download_dir.is_absolute() {
        download_dir.to_path_buf()
    } else {
        root_folder.join(download_dir)
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::job_routes())
        .merge(api::history_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
