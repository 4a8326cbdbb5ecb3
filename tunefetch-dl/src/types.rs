//! Collaborator contracts
//!
//! The orchestration core talks to the outside world only through these
//! traits. Production implementations live in `services`; tests swap in fakes.

use crate::models::TrackMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What to fetch: a known URL, or a search string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    Locator(String),
    Search(String),
}

/// Metadata reported by the fetcher; any field may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedMetadata {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
}

/// A raw audio file in the staging area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAudio {
    pub path: PathBuf,
    pub metadata: FetchedMetadata,
}

/// One entry of a resolved playlist, in source order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub locator: Option<String>,
    pub artist: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPlaylist {
    pub title: Option<String>,
    pub entries: Vec<PlaylistEntry>,
}

/// A candidate track from the generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTrack {
    pub artist: String,
    pub title: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("downloader binary not found: {0}")]
    BinaryNotFound(String),

    #[error("downloader failed: {0}")]
    ExecutionFailed(String),

    #[error("downloader timed out after {0}s")]
    TimedOut(u64),

    #[error("unexpected downloader output: {0}")]
    InvalidOutput(String),

    #[error("no result for search: {0}")]
    NoResult(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("encoder binary not found: {0}")]
    BinaryNotFound(String),

    #[error("encoder failed: {0}")]
    ExecutionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TagError {
    #[error("cannot read audio file: {0}")]
    Read(String),

    #[error("cannot write tags: {0}")]
    Write(String),
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("generator returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("invalid generator response: {0}")]
    InvalidResponse(String),
}

/// Media-fetch collaborator (third-party downloader)
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Download the best audio stream for `target` into `staging_dir`
    async fn fetch(&self, target: &FetchTarget, staging_dir: &Path)
        -> Result<FetchedAudio, FetchError>;

    /// List the entries of a playlist without downloading them
    async fn resolve_playlist(&self, url: &str) -> Result<ResolvedPlaylist, FetchError>;
}

/// Audio transcoding collaborator
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Encode `input` to MP3 at `bitrate_kbps`, returning the encoded file
    async fn transcode(&self, input: &Path, bitrate_kbps: u32) -> Result<PathBuf, TranscodeError>;
}

/// Metadata tagging collaborator
#[async_trait]
pub trait TagWriter: Send + Sync {
    async fn write_tags(&self, file: &Path, metadata: &TrackMetadata) -> Result<(), TagError>;
}

/// Generative vibe-to-tracklist collaborator
#[async_trait]
pub trait TracklistGenerator: Send + Sync {
    /// Up to `max_count` (artist, title) pairs matching `description`.
    /// Output is best-effort and validated by the caller.
    async fn generate(
        &self,
        description: &str,
        max_count: usize,
    ) -> Result<Vec<GeneratedTrack>, GeneratorError>;
}
