//! Per-unit acquisition pipeline: fetch, transcode, tag, place
//!
//! Every failure is mapped to a [`UnitFailure`] naming the step that failed.

use crate::models::{JobContext, TrackMetadata, TrackUnit};
use crate::services::classifier::parse_track_line;
use crate::services::path_resolver;
use crate::services::worker_pool::{UnitExecutor, WorkItem};
use crate::types::{FetchTarget, FetchedMetadata, MediaFetcher, TagWriter, Transcoder};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_TITLE: &str = "Unknown Title";

/// Highest `(n)` suffix tried before placement gives up
pub const MAX_NAME_SUFFIX: u32 = 999;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnitFailure {
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("tagging failed: {0}")]
    TagFailed(String),

    #[error("placement failed: {0}")]
    PlacementFailed(String),

    /// Panic or other unexpected error inside the worker
    #[error("worker error: {0}")]
    Internal(String),

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct AcquirerSettings {
    /// Raw downloads land in `<staging_dir>/<job_id>/<unit_id>/`
    pub staging_dir: PathBuf,
    pub bitrate_kbps: u32,
}

pub struct TrackAcquirer {
    fetcher: Arc<dyn MediaFetcher>,
    transcoder: Arc<dyn Transcoder>,
    tagger: Arc<dyn TagWriter>,
    settings: AcquirerSettings,
}

impl TrackAcquirer {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        transcoder: Arc<dyn Transcoder>,
        tagger: Arc<dyn TagWriter>,
        settings: AcquirerSettings,
    ) -> Self {
        Self {
            fetcher,
            transcoder,
            tagger,
            settings,
        }
    }

    /// Acquire one unit and return its final path
    pub async fn acquire(
        &self,
        unit: &TrackUnit,
        ctx: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, UnitFailure> {
        let staging = self
            .settings
            .staging_dir
            .join(ctx.job_id.to_string())
            .join(unit.unit_id.to_string());

        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| UnitFailure::FetchFailed(format!("cannot create staging dir: {}", e)))?;

        let result = self.run(unit, ctx, cancel, &staging).await;

        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            debug!(path = %staging.display(), error = %e, "Staging cleanup failed");
        }

        result
    }

    async fn run(
        &self,
        unit: &TrackUnit,
        ctx: &JobContext,
        cancel: &CancellationToken,
        staging: &Path,
    ) -> Result<PathBuf, UnitFailure> {
        let target = match &unit.source_locator {
            Some(locator) => FetchTarget::Locator(locator.clone()),
            None => FetchTarget::Search(unit.query_hint.clone()),
        };

        debug!(job_id = %ctx.job_id, unit_id = %unit.unit_id, target = ?target, "Fetching");
        let fetched = self
            .fetcher
            .fetch(&target, staging)
            .await
            .map_err(|e| UnitFailure::FetchFailed(e.to_string()))?;

        let encoded = self
            .transcoder
            .transcode(&fetched.path, self.settings.bitrate_kbps)
            .await
            .map_err(|e| UnitFailure::TranscodeFailed(e.to_string()))?;

        let metadata = resolve_metadata(unit, &fetched.metadata);
        self.tagger
            .write_tags(&encoded, &metadata)
            .await
            .map_err(|e| UnitFailure::TagFailed(e.to_string()))?;

        // Last point where a cancel can still discard the result
        if cancel.is_cancelled() {
            return Err(UnitFailure::Cancelled);
        }

        let destination = path_resolver::resolve(ctx, &metadata);
        let placed = place_file(&encoded, &destination)
            .await
            .map_err(|e| UnitFailure::PlacementFailed(e.to_string()))?;

        if placed != destination {
            debug!(
                job_id = %ctx.job_id,
                unit_id = %unit.unit_id,
                taken = %destination.display(),
                path = %placed.display(),
                "Destination taken, using numbered name"
            );
        }
        Ok(placed)
    }
}

#[async_trait]
impl UnitExecutor for TrackAcquirer {
    async fn execute(&self, item: &WorkItem) -> Result<PathBuf, UnitFailure> {
        self.acquire(&item.unit, &item.context, &item.cancel).await
    }
}

/// Artist/title/album for tagging and naming.
///
/// Priority: hints from expansion, then an "Artist - Title" query hint, then
/// what the fetcher reported.
pub fn resolve_metadata(unit: &TrackUnit, fetched: &FetchedMetadata) -> TrackMetadata {
    let parsed = parse_track_line(&unit.query_hint);
    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());

    let artist = non_empty(&unit.artist_hint)
        .or_else(|| parsed.as_ref().map(|(a, _)| a.clone()))
        .or_else(|| non_empty(&fetched.artist))
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());

    let title = non_empty(&unit.title_hint)
        .or_else(|| parsed.as_ref().map(|(_, t)| t.clone()))
        .or_else(|| non_empty(&fetched.title))
        .or_else(|| Some(unit.query_hint.trim().to_string()).filter(|q| !q.is_empty()))
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string());

    let album = non_empty(&unit.album_hint).or_else(|| non_empty(&fetched.album));

    TrackMetadata {
        artist,
        title,
        album,
    }
}

/// Move `source` to `destination`, creating parent directories. An existing
/// file is never replaced: the first free `<name> (n).mp3` is used instead.
/// Falls back to copy + delete across filesystems. Returns the path written.
pub async fn place_file(source: &Path, destination: &Path) -> std::io::Result<PathBuf> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let target = reserve_destination(destination).await?;

    if tokio::fs::rename(source, &target).await.is_ok() {
        return Ok(target);
    }

    if let Err(e) = tokio::fs::copy(source, &target).await {
        if let Err(cleanup) = tokio::fs::remove_file(&target).await {
            debug!(path = %target.display(), error = %cleanup, "Could not release reserved name");
        }
        return Err(e);
    }
    if let Err(e) = tokio::fs::remove_file(source).await {
        warn!(path = %source.display(), error = %e, "Could not remove staged file after copy");
    }
    Ok(target)
}

/// Claim the first free name by creating it empty, so concurrent workers
/// placing the same track cannot pick the same path.
async fn reserve_destination(destination: &Path) -> std::io::Result<PathBuf> {
    for n in 1..=MAX_NAME_SUFFIX {
        let candidate = path_resolver::numbered(destination, n);
        let created = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await;
        match created {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free file name for {}", destination.display()),
    ))
}
