use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the media importer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    /// Directory that holds one sub-directory per project
    pub library_root: PathBuf,
    /// Path to ffmpeg binary (PATH lookup when bare name)
    pub ffmpeg_bin: PathBuf,
    /// Path to ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Preset used when an import does not name one
    pub default_preset: String,
    /// Number of sample files kept per date group
    pub preview_samples: usize,
    /// Bounding box edge (pixels) of rendered previews
    pub preview_edge: u32,
    /// Seconds a finished job stays queryable before eviction
    pub job_retention_secs: u64,
    /// Per-file transcoder timeout in seconds (None = no limit)
    pub transcode_timeout_secs: Option<u64>,
    /// Probe videos with ffprobe for GoPro container tags during scans
    pub probe_video_tags: bool,
    /// Start the conversion job as soon as an import enters pending_conversion
    pub auto_start_conversion: bool,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ImporterConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            library_root: PathBuf::from("projects"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            default_preset: "dnxhd_1080p".to_string(),
            preview_samples: 3,
            preview_edge: 300,
            job_retention_secs: 6 * 60 * 60, // 6h
            transcode_timeout_secs: None,
            probe_video_tags: false,
            auto_start_conversion: true,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Directory of a named project inside the library
    pub fn project_path(&self, project_name: &str) -> PathBuf {
        self.library_root.join(project_name)
    }
}
