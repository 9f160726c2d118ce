use crate::error::AppError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Inspects a media file before it is handed to the speech engine.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn has_audio_stream(&self, media_path: &Path) -> Result<bool, AppError>;
}

pub struct FfprobeProbe {
    ffprobe_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
}

impl FfprobeProbe {
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self { ffprobe_path }
    }
}

fn count_audio_streams(json: &[u8]) -> Result<usize, AppError> {
    let output: ProbeOutput = serde_json::from_slice(json)?;
    Ok(output
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .count())
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn has_audio_stream(&self, media_path: &Path) -> Result<bool, AppError> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error", "-show_entries", "stream=codec_type", "-of", "json"])
            .arg(media_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AppError::Io(format!("Failed to spawn ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Io(format!(
                "ffprobe failed on {:?} with status {}: {}",
                media_path,
                output.status,
                stderr.trim()
            )));
        }

        Ok(count_audio_streams(&output.stdout)? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_only_audio_streams() {
        let json = br#"{"streams":[{"codec_type":"video"},{"codec_type":"audio"},{"codec_type":"audio"}]}"#;
        assert_eq!(count_audio_streams(json).unwrap(), 2);
    }

    #[test]
    fn test_video_only_file_has_no_audio() {
        let json = br#"{"streams":[{"codec_type":"video"}]}"#;
        assert_eq!(count_audio_streams(json).unwrap(), 0);
        assert_eq!(count_audio_streams(b"{}").unwrap(), 0);
    }

    #[test]
    fn test_garbage_output_is_an_error() {
        assert!(count_audio_streams(b"not json").is_err());
    }
}
