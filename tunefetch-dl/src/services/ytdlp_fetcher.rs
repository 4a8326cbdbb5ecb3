//! yt-dlp media fetcher
//!
//! Runs the `yt-dlp` command-line downloader as a child process and reads its
//! JSON info output.

use crate::services::classifier::parse_track_line;
use crate::types::{
    FetchError, FetchTarget, FetchedAudio, FetchedMetadata, MediaFetcher, PlaylistEntry,
    ResolvedPlaylist,
};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    binary: String,
    timeout: Duration,
    search_suffix: String,
}

impl YtDlpFetcher {
    pub fn new(binary: impl Into<String>, timeout: Duration, search_suffix: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            search_suffix: search_suffix.into(),
        }
    }

    /// Argument passed to yt-dlp for a fetch target
    pub fn target_arg(&self, target: &FetchTarget) -> String {
        match target {
            FetchTarget::Locator(url) => url.clone(),
            FetchTarget::Search(query) if self.search_suffix.is_empty() => {
                format!("ytsearch1:{}", query)
            }
            FetchTarget::Search(query) => format!("ytsearch1:{} {}", query, self.search_suffix),
        }
    }

    async fn run(&self, args: &[String]) -> Result<Vec<u8>, FetchError> {
        debug!(binary = %self.binary, args = ?args, "Running downloader");

        let mut command = Command::new(&self.binary);
        command.args(args).kill_on_drop(true);

        let output: Output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => return Err(FetchError::TimedOut(self.timeout.as_secs())),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FetchError::BinaryNotFound(self.binary.clone()))
            }
            Ok(Err(e)) => return Err(FetchError::Io(e)),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no error output");
            return Err(FetchError::ExecutionFailed(format!(
                "exit code {:?}: {}",
                output.status.code(),
                last_line.trim()
            )));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        target: &FetchTarget,
        staging_dir: &Path,
    ) -> Result<FetchedAudio, FetchError> {
        let template = staging_dir.join("%(id)s.%(ext)s");
        let args = vec![
            "-f".to_string(),
            "bestaudio/best".to_string(),
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "--no-warnings".to_string(),
            "-J".to_string(),
            "--no-simulate".to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
            self.target_arg(target),
        ];

        let stdout = self.run(&args).await?;
        let info: Value = serde_json::from_slice(&stdout)
            .map_err(|e| FetchError::InvalidOutput(format!("info JSON: {}", e)))?;

        let info = match info.get("entries") {
            Some(entries) => entries
                .get(0)
                .cloned()
                .ok_or_else(|| FetchError::NoResult(self.target_arg(target)))?,
            None => info,
        };

        let path = match downloaded_path(&info) {
            Some(path) if path.exists() => path,
            _ => single_file_in(staging_dir).await?,
        };

        Ok(FetchedAudio {
            path,
            metadata: info_metadata(&info),
        })
    }

    async fn resolve_playlist(&self, url: &str) -> Result<ResolvedPlaylist, FetchError> {
        let args = vec![
            "--flat-playlist".to_string(),
            "-J".to_string(),
            "--no-warnings".to_string(),
            url.to_string(),
        ];

        let stdout = self.run(&args).await?;
        let info: Value = serde_json::from_slice(&stdout)
            .map_err(|e| FetchError::InvalidOutput(format!("playlist JSON: {}", e)))?;

        Ok(playlist_from_json(&info))
    }
}

fn str_field(info: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| info.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Auto-generated channels are named "<Artist> - Topic"
fn clean_channel_name(name: String) -> String {
    name.strip_suffix(" - Topic").map(str::to_string).unwrap_or(name)
}

/// Path of the downloaded file as reported by yt-dlp
pub fn downloaded_path(info: &Value) -> Option<PathBuf> {
    info.get("requested_downloads")
        .and_then(|d| d.get(0))
        .and_then(|d| d.get("filepath"))
        .and_then(Value::as_str)
        .or_else(|| info.get("_filename").and_then(Value::as_str))
        .or_else(|| info.get("filename").and_then(Value::as_str))
        .map(PathBuf::from)
}

pub fn info_metadata(info: &Value) -> FetchedMetadata {
    FetchedMetadata {
        artist: str_field(info, &["artist", "creator", "uploader", "channel"]).map(clean_channel_name),
        title: str_field(info, &["track", "title"]),
        album: str_field(info, &["album"]),
    }
}

pub fn playlist_from_json(info: &Value) -> ResolvedPlaylist {
    let entries = info
        .get("entries")
        .and_then(Value::as_array)
        .map(|entries| {
            let extractor = str_field(info, &["extractor_key", "ie_key"]);
            entries
                .iter()
                .map(|entry| playlist_entry(entry, extractor.as_deref()))
                .collect()
        })
        .unwrap_or_default();

    ResolvedPlaylist {
        title: str_field(info, &["title"]),
        entries,
    }
}

/// A bare id only becomes a URL for YouTube ("Youtube", "YoutubeTab");
/// other extractors leave the entry to be searched by artist and title.
fn locator_from_id(id: &str, extractor: Option<&str>) -> Option<String> {
    extractor
        .filter(|key| key.starts_with("Youtube"))
        .map(|_| format!("https://www.youtube.com/watch?v={}", id))
}

/// `playlist_extractor` is the playlist's own extractor key, used when the
/// entry does not name one
fn playlist_entry(entry: &Value, playlist_extractor: Option<&str>) -> PlaylistEntry {
    let extractor = str_field(entry, &["ie_key", "extractor_key"]);
    let locator = str_field(entry, &["url", "webpage_url"]).or_else(|| {
        let id = str_field(entry, &["id"])?;
        locator_from_id(&id, extractor.as_deref().or(playlist_extractor))
    });

    let track = str_field(entry, &["track"]);
    let title = str_field(entry, &["title"]);
    let artist = str_field(entry, &["artist"]);

    // Video titles are often "Artist - Title" while the uploader is a label
    let (artist, title) = match (artist, track, title) {
        (Some(a), Some(t), _) | (Some(a), None, Some(t)) => (Some(a), Some(t)),
        (None, track, Some(t)) => match parse_track_line(&t) {
            Some((a, parsed)) => (Some(a), Some(track.unwrap_or(parsed))),
            None => (
                str_field(entry, &["uploader", "channel"]).map(clean_channel_name),
                Some(track.unwrap_or(t)),
            ),
        },
        (a, t, None) => (a, t),
    };

    PlaylistEntry {
        locator,
        artist,
        title,
    }
}

async fn single_file_in(dir: &Path) -> Result<PathBuf, FetchError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut found = None;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            if found.is_some() {
                return Err(FetchError::InvalidOutput(
                    "several files in staging directory".to_string(),
                ));
            }
            found = Some(entry.path());
        }
    }
    found.ok_or_else(|| FetchError::InvalidOutput("no downloaded file found".to_string()))
}
