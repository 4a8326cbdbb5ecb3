//! Classified acquisition requests
//!
//! The payload is a sum type keyed by request kind, so every consumer has to
//! handle each kind explicitly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of user input, decided by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Single video/track URL
    DirectMediaUrl,
    /// Playlist or album URL
    PlaylistUrl,
    /// Several "Artist - Title" lines
    PastedTrackList,
    /// Free-text search for one track
    SearchQuery,
    /// Mood/style description expanded by a generator
    VibeDescription,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::DirectMediaUrl => "direct_media_url",
            RequestKind::PlaylistUrl => "playlist_url",
            RequestKind::PastedTrackList => "pasted_track_list",
            RequestKind::SearchQuery => "search_query",
            RequestKind::VibeDescription => "vibe_description",
        }
    }

    /// Parse the stored string form (inverse of `as_str`)
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "direct_media_url" => Some(RequestKind::DirectMediaUrl),
            "playlist_url" => Some(RequestKind::PlaylistUrl),
            "pasted_track_list" => Some(RequestKind::PastedTrackList),
            "search_query" => Some(RequestKind::SearchQuery),
            "vibe_description" => Some(RequestKind::VibeDescription),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service a URL points at, as far as the classifier can tell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkSource {
    /// Anything the media fetcher can download directly
    #[default]
    Video,
    SpotifyPlaylist,
    SpotifyTrack,
    SpotifyAlbum,
}

impl LinkSource {
    /// Label for links that cannot be turned into units, if this is one
    pub fn unsupported_label(&self) -> Option<&'static str> {
        match self {
            LinkSource::SpotifyTrack => Some("Spotify track"),
            LinkSource::SpotifyAlbum => Some("Spotify album"),
            LinkSource::Video | LinkSource::SpotifyPlaylist => None,
        }
    }
}

/// Kind-specific data extracted from the raw input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestPayload {
    DirectMediaUrl {
        url: String,
        #[serde(default)]
        source: LinkSource,
    },
    PlaylistUrl {
        url: String,
        /// Host-side playlist/album identifier, used as a naming fallback
        playlist_id: Option<String>,
        #[serde(default)]
        source: LinkSource,
    },
    PastedTrackList {
        /// Non-blank input lines, trimmed, in input order
        lines: Vec<String>,
    },
    SearchQuery {
        /// Whitespace-collapsed query; empty for blank input
        query: String,
    },
    VibeDescription {
        description: String,
    },
}

impl RequestPayload {
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestPayload::DirectMediaUrl { .. } => RequestKind::DirectMediaUrl,
            RequestPayload::PlaylistUrl { .. } => RequestKind::PlaylistUrl,
            RequestPayload::PastedTrackList { .. } => RequestKind::PastedTrackList,
            RequestPayload::SearchQuery { .. } => RequestKind::SearchQuery,
            RequestPayload::VibeDescription { .. } => RequestKind::VibeDescription,
        }
    }
}

/// Output of the classifier. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedRequest {
    kind: RequestKind,
    raw_text: String,
    payload: RequestPayload,
}

impl ClassifiedRequest {
    pub fn new(raw_text: impl Into<String>, payload: RequestPayload) -> Self {
        Self {
            kind: payload.kind(),
            raw_text: raw_text.into(),
            payload,
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn payload(&self) -> &RequestPayload {
        &self.payload
    }
}
