use std::path::{Path, PathBuf};
use std::process::Stdio;
use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};
use crate::preset::ConversionPreset;

/// Characters of ffmpeg stderr kept in a failure message
const STDERR_TAIL: usize = 500;

/// FFmpeg version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFmpegVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FFmpegVersion {
    /// Parse version from FFmpeg version string
    /// Example: "ffmpeg version 6.1.1" -> FFmpegVersion { major: 6, minor: 1, patch: 1 }
    pub fn parse(version_str: &str) -> Result<Self> {
        // Look for version pattern: N.N or N.N.N (distro builds prefix with "n")
        let version_part = version_str
            .split_whitespace()
            .map(|s| s.trim_start_matches('n'))
            .find(|s| s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
            .ok_or_else(|| anyhow!("No version number found in: {}", version_str))?;

        let mut parts = version_part
            .split(|c: char| !c.is_ascii_digit())
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<u32>());

        let major = parts
            .next()
            .ok_or_else(|| anyhow!("No major version in: {}", version_str))?
            .context("Invalid major version")?;
        let minor = parts.next().and_then(|r| r.ok()).unwrap_or(0);
        let patch = parts.next().and_then(|r| r.ok()).unwrap_or(0);

        Ok(FFmpegVersion { major, minor, patch })
    }
}

/// Availability probe result
#[derive(Debug, Clone, Serialize)]
pub struct TranscoderStatus {
    pub available: bool,
    pub path: PathBuf,
    /// First line of `ffmpeg -version`
    pub version: Option<String>,
}

/// Outcome of one transcoder run
#[derive(Debug, Clone)]
pub struct TranscodeOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Tail of stderr, for failure reports
    pub stderr: String,
}

/// Runs the external ffmpeg binary, one file per call
#[derive(Debug, Clone)]
pub struct Transcoder {
    pub ffmpeg_bin: PathBuf,
    pub timeout_secs: Option<u64>,
}

impl Transcoder {
    pub fn new(ffmpeg_bin: PathBuf, timeout_secs: Option<u64>) -> Self {
        Self { ffmpeg_bin, timeout_secs }
    }

    /// Check that ffmpeg can be executed and report its version line
    pub async fn status(&self) -> TranscoderStatus {
        match self.detect_version().await {
            Ok(line) => TranscoderStatus {
                available: true,
                path: self.ffmpeg_bin.clone(),
                version: Some(line),
            },
            Err(e) => {
                debug!("FFmpeg unavailable at {}: {:#}", self.ffmpeg_bin.display(), e);
                TranscoderStatus {
                    available: false,
                    path: self.ffmpeg_bin.clone(),
                    version: None,
                }
            }
        }
    }

    async fn detect_version(&self) -> Result<String> {
        let output = Command::new(&self.ffmpeg_bin)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to execute FFmpeg at: {}", self.ffmpeg_bin.display()))?;

        if !output.status.success() {
            return Err(anyhow!("FFmpeg version check failed"));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow!("Empty output from FFmpeg -version"))?
            .to_string();

        if let Ok(v) = FFmpegVersion::parse(&first_line) {
            debug!("Detected FFmpeg {}.{}.{}", v.major, v.minor, v.patch);
        }
        Ok(first_line)
    }

    /// Full argument list for converting `input` into `output` with `preset`
    pub fn build_args(preset: ConversionPreset, input: &Path, output: &Path) -> Vec<String> {
        let settings = preset.settings();
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.display().to_string(),
        ];
        args.extend(settings.ffmpeg_args.iter().map(|a| a.to_string()));
        args.extend([
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-nostats".to_string(),
            output.display().to_string(),
        ]);
        args
    }

    /// Convert one file. A non-zero exit is reported in the outcome; `Err`
    /// means the process could not be run or hit the timeout.
    ///
    /// When `duration_secs` is known, in-file progress (0-100) is published
    /// on `progress`.
    pub async fn convert(
        &self,
        preset: ConversionPreset,
        input: &Path,
        output: &Path,
        duration_secs: Option<f64>,
        progress: Option<watch::Sender<f64>>,
    ) -> Result<TranscodeOutcome> {
        let args = Self::build_args(preset, input, output);
        debug!("Executing FFmpeg: {} {}", self.ffmpeg_bin.display(), args.join(" "));

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!(
                "Failed to spawn FFmpeg process at: {}. Ensure FFmpeg is installed and accessible.",
                self.ffmpeg_bin.display()
            ))?;

        let stdout = child.stdout.take()
            .ok_or_else(|| anyhow!("Failed to capture FFmpeg stdout"))?;
        let mut stderr = child.stderr.take()
            .ok_or_else(|| anyhow!("Failed to capture FFmpeg stderr"))?;

        let stdout_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let (Some(total), Some(tx)) = (duration_secs, progress.as_ref()) {
                    if let Some(secs) = parse_progress_line(&line) {
                        let _ = tx.send((secs / total * 100.0).clamp(0.0, 100.0));
                    }
                }
            }
        });

        let stderr_handle = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let status = match self.timeout_secs {
            Some(secs) => match timeout(Duration::from_secs(secs), child.wait()).await {
                Ok(result) => result.context("Failed to wait for FFmpeg process")?,
                Err(_) => {
                    child.kill().await.context("Failed to kill stuck FFmpeg process")?;
                    return Err(anyhow!(
                        "FFmpeg process timed out after {} seconds. Process was killed.",
                        secs
                    ));
                }
            },
            None => child.wait().await.context("Failed to wait for FFmpeg process")?,
        };

        let _ = stdout_handle.await;
        let stderr = stderr_handle.await.context("Failed to read FFmpeg stderr")?;

        let outcome = TranscodeOutcome {
            success: status.success(),
            exit_code: status.code(),
            stderr: tail(&stderr, STDERR_TAIL),
        };

        if outcome.success {
            info!("FFmpeg finished: {}", output.display());
        } else {
            debug!("FFmpeg exit code {:?} for {}", outcome.exit_code, input.display());
        }
        Ok(outcome)
    }
}

/// Seconds encoded so far from one `-progress` line
fn parse_progress_line(line: &str) -> Option<f64> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        // both are microseconds despite the name
        "out_time_us" | "out_time_ms" => value.parse::<i64>().ok().map(|us| us.max(0) as f64 / 1_000_000.0),
        _ => None,
    }
}

fn tail(s: &str, max_chars: usize) -> String {
    let trimmed = s.trim();
    let count = trimmed.chars().count();
    trimmed.chars().skip(count.saturating_sub(max_chars)).collect()
}
