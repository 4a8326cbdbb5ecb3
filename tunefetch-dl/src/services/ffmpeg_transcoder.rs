//! ffmpeg transcoder
//!
//! Normalizes any fetched audio to constant-bitrate MP3.

use crate::types::{TranscodeError, Transcoder};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: String,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

/// Encoded file lives next to the input, never overwriting it
pub fn output_path_for(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    input.with_file_name(format!("{}.encoded.mp3", stem))
}

pub fn ffmpeg_args(input: &Path, output: &Path, bitrate_kbps: u32) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-vn".to_string(),
        "-codec:a".to_string(),
        "libmp3lame".to_string(),
        "-b:a".to_string(),
        format!("{}k", bitrate_kbps),
        output.to_string_lossy().into_owned(),
    ]
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, bitrate_kbps: u32) -> Result<PathBuf, TranscodeError> {
        let output_path = output_path_for(input);
        let args = ffmpeg_args(input, &output_path, bitrate_kbps);
        debug!(binary = %self.binary, input = %input.display(), bitrate_kbps, "Transcoding");

        let mut command = Command::new(&self.binary);
        command.args(&args).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => {
                return Err(TranscodeError::ExecutionFailed(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TranscodeError::BinaryNotFound(self.binary.clone()))
            }
            Ok(Err(e)) => return Err(TranscodeError::Io(e)),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscodeError::ExecutionFailed(format!(
                "exit code {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        if let Err(e) = tokio::fs::remove_file(input).await {
            debug!(path = %input.display(), error = %e, "Could not remove raw download");
        }

        Ok(output_path)
    }
}
