use std::collections::HashMap;
use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use log::debug;
use serde::Deserialize;
use tokio::process::Command;

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    pub format: FFProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub tags: Option<HashMap<String, String>>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub tags: Option<HashMap<String, String>>,
}

const GOPRO_TAG_KEYS: &[&str] = &["encoder", "handler_name"];

fn tags_mention_gopro(tags: &Option<HashMap<String, String>>) -> bool {
    tags.as_ref()
        .map(|tags| {
            GOPRO_TAG_KEYS
                .iter()
                .filter_map(|k| tags.get(*k))
                .any(|v| v.contains("GoPro"))
        })
        .unwrap_or(false)
}

impl FFProbeData {
    /// Container duration in seconds
    pub fn duration_secs(&self) -> Option<f64> {
        self.format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| *d > 0.0)
    }

    /// GoPro cameras stamp their name into the encoder / handler tags
    pub fn is_gopro(&self) -> bool {
        tags_mention_gopro(&self.format.tags) || self.streams.iter().any(|s| tags_mention_gopro(&s.tags))
    }
}

/// Thin wrapper around the ffprobe binary
#[derive(Debug, Clone)]
pub struct FFProbe {
    pub ffprobe_bin: PathBuf,
}

impl FFProbe {
    pub fn new(ffprobe_bin: PathBuf) -> Self {
        Self { ffprobe_bin }
    }

    /// Run ffprobe and parse the JSON output
    pub async fn probe(&self, file_path: &Path) -> Result<FFProbeData> {
        if !file_path.exists() {
            return Err(anyhow!("File does not exist: {}", file_path.display()));
        }

        debug!("Executing FFprobe for: {}", file_path.display());

        let output = Command::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(file_path)
            .output()
            .await
            .with_context(|| format!(
                "Failed to execute FFprobe for: {}. Ensure FFprobe is installed and accessible at: {}",
                file_path.display(),
                self.ffprobe_bin.display()
            ))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "FFprobe failed (exit code {}) for {}: {}",
                output.status.code().unwrap_or(-1),
                file_path.display(),
                stderr
            ));
        }

        let json_str = String::from_utf8(output.stdout)
            .context("FFprobe output is not valid UTF-8")?;
        let data: FFProbeData = serde_json::from_str(&json_str)
            .with_context(|| format!("Failed to parse FFprobe JSON for: {}", file_path.display()))?;

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gopro_tags_and_duration() {
        let json = r#"{
            "streams": [
                {"index": 0, "codec_type": "video", "codec_name": "hevc",
                 "tags": {"handler_name": "\tGoPro H.265"}},
                {"index": 1, "codec_type": "audio", "codec_name": "aac"}
            ],
            "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "61.500000",
                       "tags": {"major_brand": "mp41"}}
        }"#;
        let data: FFProbeData = serde_json::from_str(json).unwrap();
        assert!(data.is_gopro());
        assert_eq!(data.duration_secs(), Some(61.5));
    }

    #[test]
    fn test_plain_video_not_gopro() {
        let json = r#"{
            "streams": [{"index": 0, "codec_type": "video", "codec_name": "h264",
                         "tags": {"handler_name": "VideoHandler"}}],
            "format": {"format_name": "mov", "tags": {"encoder": "Lavf60.3.100"}}
        }"#;
        let data: FFProbeData = serde_json::from_str(json).unwrap();
        assert!(!data.is_gopro());
        assert_eq!(data.duration_secs(), None);
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let probe = FFProbe::new(PathBuf::from("ffprobe"));
        let err = probe.probe(Path::new("/nonexistent/clip.mp4")).await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
