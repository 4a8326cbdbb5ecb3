//! Ollama tracklist generator
//!
//! Asks a local Ollama model for a CSV of `artist,title` lines matching a
//! mood description and parses whatever comes back leniently.

use crate::services::classifier::strip_list_marker;
use crate::types::{GeneratedTrack, GeneratorError, TracklistGenerator};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("tunefetch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    http_client: Client,
    base_url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GeneratorError> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    /// True when the Ollama server answers its model listing
    pub async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Generator health check failed");
                false
            }
        }
    }
}

#[async_trait]
impl TracklistGenerator for OllamaGenerator {
    async fn generate(
        &self,
        description: &str,
        max_count: usize,
    ) -> Result<Vec<GeneratedTrack>, GeneratorError> {
        info!(model = %self.model, tracks = max_count, "Requesting generated tracklist");

        let request = GenerateRequest {
            model: &self.model,
            prompt: build_prompt(description, max_count),
            stream: false,
        };

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::InvalidResponse(e.to_string()))?;

        if body.response.trim().is_empty() {
            return Err(GeneratorError::InvalidResponse("empty response".to_string()));
        }

        let tracks = parse_csv_tracklist(&body.response);
        debug!(parsed = tracks.len(), "Parsed generator output");
        Ok(tracks)
    }
}

pub fn build_prompt(description: &str, count: usize) -> String {
    format!(
        "You are a music supervisor creating playlists. Generate a playlist of exactly {count} \
songs based on this description: \"{description}\"\n\n\
Output ONLY valid CSV format with exactly two columns: artist,title\n\
No headers, no explanations, no numbering, no extra text.\n\
Each line should be: Artist Name,Song Title\n\n\
Example format:\n\
MGMT,Kids\n\
Passion Pit,Sleepyhead\n\n\
Now generate the playlist:"
    )
}

/// Parse `artist,title` lines, skipping prose, headers and markdown fences.
/// Splits on the first comma so titles may contain commas.
pub fn parse_csv_tracklist(text: &str) -> Vec<GeneratedTrack> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("```") && !line.starts_with("---"))
        .filter(|line| !line.eq_ignore_ascii_case("artist,title"))
        .filter(|line| !line.ends_with(':'))
        .filter_map(|line| {
            let (artist, title) = split_csv_pair(strip_list_marker(line))?;
            let artist = unquote(artist);
            let title = unquote(title);
            (!artist.is_empty() && !title.is_empty()).then(|| GeneratedTrack {
                artist: artist.to_string(),
                title: title.to_string(),
            })
        })
        .collect()
}

/// Split at the first comma, honouring a double-quoted first field
fn split_csv_pair(line: &str) -> Option<(&str, &str)> {
    if let Some(rest) = line.strip_prefix('"') {
        let (artist, after) = rest.split_once('"')?;
        let title = after.trim_start().strip_prefix(',')?;
        return Some((artist, title));
    }
    line.split_once(',')
}

fn unquote(field: &str) -> &str {
    let field = field.trim();
    field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .unwrap_or(field)
        .trim()
}
