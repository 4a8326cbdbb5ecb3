//! Service configuration
//!
//! Loaded from `tunefetch-dl.toml`; every key is optional. A handful of
//! settings can be overridden from the environment after the file is read.

use crate::services::retry::RetryPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tunefetch_common::config::LoggingConfig;
use tunefetch_common::time::{millis_to_duration, secs_to_duration};

/// Top-level TOML file layout
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub root_folder: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

impl TomlConfig {
    /// Apply `TUNEFETCH_*` environment overrides on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_string("TUNEFETCH_DOWNLOAD_DIR") {
            self.acquisition.download_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse("TUNEFETCH_MAX_ATTEMPTS") {
            self.acquisition.max_attempts = v;
        }
        if let Some(v) = env_string("TUNEFETCH_YTDLP_BIN") {
            self.tools.ytdlp_bin = v;
        }
        if let Some(v) = env_string("TUNEFETCH_FFMPEG_BIN") {
            self.tools.ffmpeg_bin = v;
        }
        if let Some(v) = env_string("TUNEFETCH_GENERATOR_URL") {
            self.generator.url = v;
        }
        if let Some(v) = env_string("TUNEFETCH_GENERATOR_MODEL") {
            self.generator.model = v;
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.trim().parse().ok())
}

/// `[acquisition]`: scheduling, retry and output settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Concurrent workers shared by all jobs
    pub worker_count: usize,
    /// Attempts per unit before it is terminally failed
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Upper bound on a whole submission's expansion step
    pub expansion_timeout_secs: u64,
    /// Timeout of one playlist-resolution or generator call
    pub external_call_timeout_secs: u64,
    /// Attempts for playlist resolution and generation
    pub external_call_attempts: u32,
    /// Default number of tracks requested for vibe jobs
    pub vibe_track_count: usize,
    pub download_dir: PathBuf,
    /// Scratch space for raw downloads; defaults to `<download_dir>/.staging`
    pub staging_dir: Option<PathBuf>,
    pub target_bitrate_kbps: u32,
    pub default_playlist_name: String,
    /// Max time spent retrying a locked history database
    pub db_max_lock_wait_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 60_000,
            expansion_timeout_secs: 180,
            external_call_timeout_secs: 120,
            external_call_attempts: 2,
            vibe_track_count: 30,
            download_dir: PathBuf::from("downloads"),
            staging_dir: None,
            target_bitrate_kbps: 320,
            default_playlist_name: "pasted_playlist".to_string(),
            db_max_lock_wait_ms: 5_000,
        }
    }
}

impl AcquisitionConfig {
    /// Per-unit retry policy
    pub fn unit_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            millis_to_duration(self.initial_backoff_ms),
            millis_to_duration(self.max_backoff_ms),
        )
    }

    /// Retry policy for playlist resolution and generation calls
    pub fn external_call_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.external_call_attempts,
            millis_to_duration(self.initial_backoff_ms),
            millis_to_duration(self.max_backoff_ms),
        )
    }

    pub fn expansion_timeout(&self) -> Duration {
        secs_to_duration(self.expansion_timeout_secs)
    }

    pub fn external_call_timeout(&self) -> Duration {
        secs_to_duration(self.external_call_timeout_secs)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| self.download_dir.join(".staging"))
    }
}

/// `[tools]`: external command-line tools
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ytdlp_bin: String,
    pub ffmpeg_bin: String,
    pub fetch_timeout_secs: u64,
    /// Appended to search queries to prefer studio recordings
    pub search_suffix: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_bin: "yt-dlp".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            fetch_timeout_secs: 600,
            search_suffix: "official audio".to_string(),
        }
    }
}

/// `[generator]`: text-generation service used for vibe requests
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub url: String,
    pub model: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "ministral-3".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_empty_file_gives_defaults() {
        let cfg: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.acquisition.worker_count, 4);
        assert_eq!(cfg.acquisition.max_attempts, 3);
        assert_eq!(cfg.acquisition.vibe_track_count, 30);
        assert_eq!(cfg.acquisition.target_bitrate_kbps, 320);
        assert_eq!(cfg.tools.ytdlp_bin, "yt-dlp");
        assert_eq!(cfg.generator.url, "http://localhost:11434");
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_partial_table_keeps_other_defaults() {
        let cfg: TomlConfig = toml::from_str(
            "[acquisition]\nworker_count = 2\ndownload_dir = \"/music\"\n",
        )
        .unwrap();
        assert_eq!(cfg.acquisition.worker_count, 2);
        assert_eq!(cfg.acquisition.max_attempts, 3);
        assert_eq!(cfg.acquisition.staging_dir(), PathBuf::from("/music/.staging"));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let cfg = AcquisitionConfig {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            ..AcquisitionConfig::default()
        };
        let policy = cfg.unit_retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_backoff, Duration::from_secs(1));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file_values() {
        std::env::set_var("TUNEFETCH_GENERATOR_MODEL", "llama3");
        std::env::set_var("TUNEFETCH_MAX_ATTEMPTS", "7");
        let mut cfg: TomlConfig = toml::from_str("[generator]\nmodel = \"mistral\"\n").unwrap();
        cfg.apply_env_overrides();
        std::env::remove_var("TUNEFETCH_GENERATOR_MODEL");
        std::env::remove_var("TUNEFETCH_MAX_ATTEMPTS");

        assert_eq!(cfg.generator.model, "llama3");
        assert_eq!(cfg.acquisition.max_attempts, 7);
    }
}
