//! Input classifier
//!
//! Turns raw user text into a [`ClassifiedRequest`]. Classification is total,
//! pure and deterministic: every string maps to exactly one kind, with
//! `SearchQuery` as the fallback.
//!
//! Rules are evaluated in priority order and the first match wins:
//! 1. Spotify link (playlists expand, tracks and albums are rejected later)
//! 2. direct media URL
//! 3. playlist URL
//! 4. pasted track list
//! 5. short free text, split between search and vibe by a [`QueryDisambiguator`]
//! 6. fallback search

use crate::models::{ClassifiedRequest, LinkSource, RequestKind, RequestPayload};
use std::sync::Arc;
use url::Url;

/// Free text longer than this is never treated as search/vibe
pub const SHORT_TEXT_MAX_LINES: usize = 3;
pub const SHORT_TEXT_MAX_CHARS: usize = 280;

/// A single classification rule
pub struct Rule {
    pub name: &'static str,
    pub matcher: fn(&str) -> Option<RequestPayload>,
}

/// URL and track-list rules, highest priority first
pub const RULES: &[Rule] = &[
    Rule {
        name: "spotify_link",
        matcher: spotify_rule,
    },
    Rule {
        name: "direct_media_url",
        matcher: direct_media_rule,
    },
    Rule {
        name: "playlist_url",
        matcher: playlist_rule,
    },
    Rule {
        name: "pasted_track_list",
        matcher: track_list_rule,
    },
];

/// Decides between `SearchQuery` and `VibeDescription` for short free text
pub trait QueryDisambiguator: Send + Sync {
    /// Must return `SearchQuery` or `VibeDescription`
    fn disambiguate(&self, text: &str) -> RequestKind;
}

/// Default: an "Artist - Title" shape means search, anything else is a vibe
#[derive(Debug, Default, Clone, Copy)]
pub struct SeparatorDisambiguator;

impl QueryDisambiguator for SeparatorDisambiguator {
    fn disambiguate(&self, text: &str) -> RequestKind {
        if split_on_dash(text).is_some() {
            RequestKind::SearchQuery
        } else {
            RequestKind::VibeDescription
        }
    }
}

/// Mood words that mark a description rather than a track search
pub const VIBE_KEYWORDS: &[&str] = &[
    "music for", "playlist", "vibe", "vibes", "mood", "feeling", "upbeat", "chill",
    "relaxing", "energetic", "party", "workout", "study", "focus", "sleep", "background",
];

/// Alternative: mood vocabulary means vibe, very short text means search
#[derive(Debug, Clone, Copy)]
pub struct VocabularyDisambiguator {
    pub max_search_words: usize,
}

impl Default for VocabularyDisambiguator {
    fn default() -> Self {
        Self { max_search_words: 5 }
    }
}

impl QueryDisambiguator for VocabularyDisambiguator {
    fn disambiguate(&self, text: &str) -> RequestKind {
        if split_on_dash(text).is_some() {
            return RequestKind::SearchQuery;
        }

        let lower = text.to_lowercase();
        let has_vibe_word = VIBE_KEYWORDS.iter().any(|kw| {
            if kw.contains(' ') {
                lower.contains(kw)
            } else {
                lower
                    .split(|c: char| !c.is_alphanumeric())
                    .any(|word| word == *kw)
            }
        });

        if has_vibe_word {
            RequestKind::VibeDescription
        } else if lower.split_whitespace().count() <= self.max_search_words {
            RequestKind::SearchQuery
        } else {
            RequestKind::VibeDescription
        }
    }
}

/// Classifier with a pluggable search/vibe decision
#[derive(Clone)]
pub struct Classifier {
    disambiguator: Arc<dyn QueryDisambiguator>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(Arc::new(SeparatorDisambiguator))
    }
}

impl Classifier {
    pub fn new(disambiguator: Arc<dyn QueryDisambiguator>) -> Self {
        Self { disambiguator }
    }

    pub fn classify(&self, raw_text: &str) -> ClassifiedRequest {
        let trimmed = raw_text.trim();

        if trimmed.is_empty() {
            return ClassifiedRequest::new(
                raw_text,
                RequestPayload::SearchQuery {
                    query: String::new(),
                },
            );
        }

        for rule in RULES {
            if let Some(payload) = (rule.matcher)(trimmed) {
                tracing::debug!(rule = rule.name, "Input classified");
                return ClassifiedRequest::new(raw_text, payload);
            }
        }

        if is_short_free_text(trimmed) {
            let text = collapse_whitespace(trimmed);
            let payload = match self.disambiguator.disambiguate(&text) {
                RequestKind::VibeDescription => RequestPayload::VibeDescription { description: text },
                _ => RequestPayload::SearchQuery { query: text },
            };
            return ClassifiedRequest::new(raw_text, payload);
        }

        ClassifiedRequest::new(
            raw_text,
            RequestPayload::SearchQuery {
                query: collapse_whitespace(trimmed),
            },
        )
    }
}

/// Classify with the default disambiguator
pub fn classify(raw_text: &str) -> ClassifiedRequest {
    Classifier::default().classify(raw_text)
}

/// http(s) URLs among the whitespace-separated tokens, in order
fn urls_in(text: &str) -> impl Iterator<Item = Url> + '_ {
    text.split_whitespace()
        .filter_map(|token| Url::parse(token).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
}

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, v)| k == key && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}

fn is_direct_media_url(url: &Url) -> bool {
    let host = url.host_str().unwrap_or_default().trim_start_matches("www.");
    let path = url.path().trim_end_matches('/');

    if host == "youtu.be" {
        return path.len() > 1;
    }
    if path == "/watch" && query_value(url, "v").is_some() {
        return true;
    }
    path.strip_prefix("/shorts/")
        .is_some_and(|id| !id.is_empty())
}

fn playlist_id(url: &Url) -> Option<String> {
    let path = url.path().trim_end_matches('/');
    if path == "/playlist" || path == "/watch" {
        return query_value(url, "list");
    }
    None
}

const SPOTIFY_HOST: &str = "open.spotify.com";

/// `open.spotify.com/[intl-xx/]{playlist,track,album}/<id>`
fn spotify_link(url: &Url) -> Option<(LinkSource, String)> {
    if url.host_str()? != SPOTIFY_HOST {
        return None;
    }
    let mut segments = url
        .path_segments()?
        .filter(|s| !s.is_empty() && !s.starts_with("intl-"));
    let source = match segments.next()? {
        "playlist" => LinkSource::SpotifyPlaylist,
        "track" => LinkSource::SpotifyTrack,
        "album" => LinkSource::SpotifyAlbum,
        _ => return None,
    };
    let id = segments.next()?;
    Some((source, id.to_string()))
}

/// Rule 1: a Spotify playlist, track or album link
pub fn spotify_rule(text: &str) -> Option<RequestPayload> {
    urls_in(text).find_map(|url| {
        let (source, id) = spotify_link(&url)?;
        let url = url.to_string();
        Some(match source {
            LinkSource::SpotifyTrack => RequestPayload::DirectMediaUrl { url, source },
            _ => RequestPayload::PlaylistUrl {
                url,
                playlist_id: Some(id),
                source,
            },
        })
    })
}

/// Rule 2: a URL pointing at a single video or track
pub fn direct_media_rule(text: &str) -> Option<RequestPayload> {
    urls_in(text)
        .find(is_direct_media_url)
        .map(|url| RequestPayload::DirectMediaUrl {
            url: url.to_string(),
            source: LinkSource::Video,
        })
}

/// Rule 3: a playlist URL
pub fn playlist_rule(text: &str) -> Option<RequestPayload> {
    urls_in(text).find_map(|url| {
        playlist_id(&url).map(|id| RequestPayload::PlaylistUrl {
            url: url.to_string(),
            playlist_id: Some(id),
            source: LinkSource::Video,
        })
    })
}

/// Rule 4: two or more non-blank lines, more than half shaped like "Artist - Title"
pub fn track_list_rule(text: &str) -> Option<RequestPayload> {
    let lines: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    if lines.len() < 2 {
        return None;
    }

    let parsed = lines.iter().filter(|l| parse_track_line(l).is_some()).count();
    if parsed * 2 > lines.len() {
        Some(RequestPayload::PastedTrackList { lines })
    } else {
        None
    }
}

fn is_short_free_text(text: &str) -> bool {
    urls_in(text).next().is_none()
        && text.lines().filter(|l| !l.trim().is_empty()).count() <= SHORT_TEXT_MAX_LINES
        && text.chars().count() <= SHORT_TEXT_MAX_CHARS
}

/// Collapse runs of whitespace (including newlines) into single spaces
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

const DASH_SEPARATORS: &[&str] = &[" - ", " – ", " — ", "\t"];
const MAX_FIELD_CHARS: usize = 200;

/// Drop leading "1.", "02)" numbering and "-", "*", "•" bullets. "3 - " is
/// only numbering when the remainder is itself a track line, so a band
/// called "311" keeps its name.
pub(crate) fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();

    for bullet in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return rest.trim_start();
        }
    }

    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 && digits <= 3 {
        let rest = &line[digits..];
        for marker in [". ", ") ", ".\t", ")\t"] {
            if let Some(after) = rest.strip_prefix(marker) {
                return after.trim_start();
            }
        }
        if let Some(after) = rest.strip_prefix(" - ") {
            let after = after.trim_start();
            if split_on_dash(after).or_else(|| split_pair(after, ",")).is_some() {
                return after;
            }
        }
    }

    line
}

fn split_pair<'a>(line: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    let (artist, title) = line.split_once(sep)?;
    let (artist, title) = (artist.trim(), title.trim());
    let valid = |s: &str| !s.is_empty() && s.chars().count() <= MAX_FIELD_CHARS;
    (valid(artist) && valid(title)).then_some((artist, title))
}

fn split_on_dash(line: &str) -> Option<(&str, &str)> {
    DASH_SEPARATORS.iter().find_map(|sep| split_pair(line, sep))
}

/// Parse one "Artist - Title" line. Dash-like separators and tabs are tried
/// first; a comma is accepted as a last resort. Splits on the first occurrence.
pub fn parse_track_line(line: &str) -> Option<(String, String)> {
    let line = strip_list_marker(line);
    split_on_dash(line)
        .or_else(|| split_pair(line, ","))
        .map(|(a, t)| (a.to_string(), t.to_string()))
}
