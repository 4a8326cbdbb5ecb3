//! Track list expander
//!
//! Turns a classified request into an ordered, non-empty list of
//! [`TrackUnit`]s. Per-line and per-entry problems are collected as warnings;
//! the request as a whole fails only when no unit can be produced.

use crate::models::{ClassifiedRequest, LinkSource, RequestPayload, TrackUnit};
use crate::services::classifier::parse_track_line;
use crate::services::path_resolver::vibe_playlist_name;
use crate::services::retry::{call_with_retry, CallFailure, RetryPolicy};
use crate::types::{GeneratedTrack, MediaFetcher, ResolvedPlaylist, TracklistGenerator};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Upper bound on tracks requested from the generator
pub const MAX_VIBE_TRACKS: usize = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpansionError {
    #[error("search query is empty")]
    EmptyQuery,

    #[error("playlist has no entries")]
    EmptyPlaylist,

    #[error("playlist could not be resolved: {0}")]
    PlaylistUnavailable(String),

    #[error("no line could be parsed as 'Artist - Title'")]
    NoParsableTracks,

    #[error("track list generation failed: {0}")]
    GenerationFailed(String),

    #[error("generator returned no usable tracks")]
    EmptyGeneration,

    #[error("{0} links cannot be downloaded; search for 'Artist - Title' instead")]
    UnsupportedLink(String),
}

fn ensure_supported(source: LinkSource) -> Result<(), ExpansionError> {
    match source.unsupported_label() {
        Some(label) => Err(ExpansionError::UnsupportedLink(label.to_string())),
        None => Ok(()),
    }
}

/// Caller-supplied knobs for one submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Playlist name for pasted lists
    pub playlist_name: Option<String>,
    /// Number of tracks requested for vibe descriptions
    pub track_count: Option<usize>,
}

/// Result of a successful expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    /// Non-empty, positions 0..n in source order
    pub units: Vec<TrackUnit>,
    pub playlist_name: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExpanderSettings {
    pub call_policy: RetryPolicy,
    pub call_timeout: Duration,
    pub default_track_count: usize,
    pub default_playlist_name: String,
}

impl Default for ExpanderSettings {
    fn default() -> Self {
        Self {
            call_policy: RetryPolicy::default(),
            call_timeout: Duration::from_secs(120),
            default_track_count: 30,
            default_playlist_name: "pasted_playlist".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct TrackListExpander {
    fetcher: Arc<dyn MediaFetcher>,
    generator: Arc<dyn TracklistGenerator>,
    settings: ExpanderSettings,
}

impl TrackListExpander {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        generator: Arc<dyn TracklistGenerator>,
        settings: ExpanderSettings,
    ) -> Self {
        Self {
            fetcher,
            generator,
            settings,
        }
    }

    pub async fn expand(
        &self,
        request: &ClassifiedRequest,
        options: &SubmitOptions,
    ) -> Result<Expansion, ExpansionError> {
        match request.payload() {
            RequestPayload::DirectMediaUrl { url, source } => {
                ensure_supported(*source)?;
                Ok(Expansion {
                    units: vec![TrackUnit::from_locator(0, url)],
                    playlist_name: None,
                    warnings: Vec::new(),
                })
            }
            RequestPayload::PlaylistUrl {
                url,
                playlist_id,
                source,
            } => {
                ensure_supported(*source)?;
                self.expand_playlist(url, playlist_id.as_deref(), *source).await
            }
            RequestPayload::PastedTrackList { lines } => {
                let name = options
                    .playlist_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .unwrap_or(&self.settings.default_playlist_name)
                    .to_string();
                expand_track_lines(lines, name)
            }
            RequestPayload::SearchQuery { query } => {
                if query.trim().is_empty() {
                    return Err(ExpansionError::EmptyQuery);
                }
                Ok(Expansion {
                    units: vec![TrackUnit::from_query(0, query)],
                    playlist_name: None,
                    warnings: Vec::new(),
                })
            }
            RequestPayload::VibeDescription { description } => {
                let count = options
                    .track_count
                    .unwrap_or(self.settings.default_track_count)
                    .clamp(1, MAX_VIBE_TRACKS);
                self.expand_vibe(description, count).await
            }
        }
    }

    async fn expand_playlist(
        &self,
        url: &str,
        playlist_id: Option<&str>,
        source: LinkSource,
    ) -> Result<Expansion, ExpansionError> {
        let fetcher = Arc::clone(&self.fetcher);
        let resolved = call_with_retry(
            "resolve_playlist",
            &self.settings.call_policy,
            self.settings.call_timeout,
            || {
                let fetcher = Arc::clone(&fetcher);
                async move { fetcher.resolve_playlist(url).await }
            },
        )
        .await
        .map_err(|failure| match failure {
            CallFailure::TimedOut(t) => {
                ExpansionError::PlaylistUnavailable(format!("timed out after {}s", t.as_secs()))
            }
            CallFailure::Failed(e) => ExpansionError::PlaylistUnavailable(e.to_string()),
        })?;

        match source {
            LinkSource::SpotifyPlaylist => spotify_playlist_units(resolved, playlist_id),
            _ => playlist_units(resolved, playlist_id),
        }
    }

    async fn expand_vibe(
        &self,
        description: &str,
        count: usize,
    ) -> Result<Expansion, ExpansionError> {
        let generator = Arc::clone(&self.generator);
        let generated = call_with_retry(
            "generate_tracklist",
            &self.settings.call_policy,
            self.settings.call_timeout,
            || {
                let generator = Arc::clone(&generator);
                async move { generator.generate(description, count).await }
            },
        )
        .await
        .map_err(|failure| match failure {
            CallFailure::TimedOut(t) => {
                ExpansionError::GenerationFailed(format!("timed out after {}s", t.as_secs()))
            }
            CallFailure::Failed(e) => ExpansionError::GenerationFailed(e.to_string()),
        })?;

        let (units, dropped) = validate_generated(generated, count);
        if units.is_empty() {
            return Err(ExpansionError::EmptyGeneration);
        }

        info!(requested = count, accepted = units.len(), dropped, "Vibe expanded");

        let mut warnings = Vec::new();
        if dropped > 0 {
            warnings.push(format!(
                "{} generated entries were empty, duplicated or beyond the requested count",
                dropped
            ));
        }

        Ok(Expansion {
            units,
            playlist_name: Some(vibe_playlist_name(description)),
            warnings,
        })
    }
}

/// Parse pasted lines, dropping unparsable and repeated ones with a warning.
/// Repeats are matched case-insensitively on the parsed pair.
pub fn expand_track_lines(
    lines: &[String],
    playlist_name: String,
) -> Result<Expansion, ExpansionError> {
    let mut units = Vec::new();
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();

    for (line_no, line) in lines.iter().enumerate() {
        match parse_track_line(line) {
            Some((artist, title)) => {
                if !seen.insert((artist.to_lowercase(), title.to_lowercase())) {
                    warn!(line = line_no + 1, text = %line, "Skipping repeated track line");
                    warnings.push(format!("line {}: '{}' is already in the list", line_no + 1, line));
                    continue;
                }
                units.push(TrackUnit::from_pair(units.len(), &artist, &title));
            }
            None => {
                warn!(line = line_no + 1, text = %line, "Skipping unparsable track line");
                warnings.push(format!("line {}: could not parse '{}'", line_no + 1, line));
            }
        }
    }

    if units.is_empty() {
        return Err(ExpansionError::NoParsableTracks);
    }

    Ok(Expansion {
        units,
        playlist_name: Some(playlist_name),
        warnings,
    })
}

/// Map resolved playlist entries to units in source order
pub fn playlist_units(
    resolved: ResolvedPlaylist,
    playlist_id: Option<&str>,
) -> Result<Expansion, ExpansionError> {
    let mut units = Vec::new();
    let mut warnings = Vec::new();

    for (index, entry) in resolved.entries.into_iter().enumerate() {
        let artist = entry.artist.filter(|a| !a.trim().is_empty());
        let title = entry.title.filter(|t| !t.trim().is_empty());
        let position = units.len();

        let unit = match (entry.locator, &artist, &title) {
            (Some(locator), _, _) => {
                let mut unit = TrackUnit::from_locator(position, &locator);
                unit.query_hint = match (&artist, &title) {
                    (Some(a), Some(t)) => format!("{} - {}", a, t),
                    (None, Some(t)) => t.clone(),
                    _ => String::new(),
                };
                unit.artist_hint = artist.clone();
                unit.title_hint = title.clone();
                unit
            }
            (None, Some(a), Some(t)) => TrackUnit::from_pair(position, a, t),
            (None, None, Some(t)) => TrackUnit::from_query(position, t),
            _ => {
                warnings.push(format!("playlist entry {} has no locator or title", index + 1));
                continue;
            }
        };
        units.push(unit);
    }

    if units.is_empty() {
        return Err(ExpansionError::EmptyPlaylist);
    }

    let playlist_name = resolved
        .title
        .filter(|t| !t.trim().is_empty())
        .or_else(|| playlist_id.map(|id| format!("playlist_{}", id)))
        .unwrap_or_else(|| "playlist".to_string());

    Ok(Expansion {
        units,
        playlist_name: Some(playlist_name),
        warnings,
    })
}

/// Spotify entries come back with Spotify locators the fetcher cannot
/// download, so every entry is searched by artist and title instead.
pub fn spotify_playlist_units(
    mut resolved: ResolvedPlaylist,
    playlist_id: Option<&str>,
) -> Result<Expansion, ExpansionError> {
    for entry in &mut resolved.entries {
        entry.locator = None;
    }
    let mut expansion = playlist_units(resolved, playlist_id)?;
    if let Some(id) = playlist_id {
        expansion.playlist_name = Some(format!("spotify_playlist_{}", id));
    }
    Ok(expansion)
}

/// Trim, drop empty pairs, de-duplicate case-insensitively, cap at `max_count`.
/// Returns the units and the number of entries dropped.
pub fn validate_generated(generated: Vec<GeneratedTrack>, max_count: usize) -> (Vec<TrackUnit>, usize) {
    let total = generated.len();
    let mut seen = HashSet::new();
    let mut units = Vec::new();

    for track in generated {
        if units.len() >= max_count {
            break;
        }
        let artist = track.artist.trim();
        let title = track.title.trim();
        if artist.is_empty() || title.is_empty() {
            continue;
        }
        if seen.insert((artist.to_lowercase(), title.to_lowercase())) {
            units.push(TrackUnit::from_pair(units.len(), artist, title));
        }
    }

    let dropped = total.saturating_sub(units.len());
    (units, dropped)
}
