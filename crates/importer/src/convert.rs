use std::path::{Path, PathBuf};
use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use crate::ffmpeg::Transcoder;
use crate::ffprobe::FFProbe;
use crate::import::unique_path;
use crate::job::{ConversionPlan, JobRegistry, JobStatus, JobSummary, JobUpdate};
use crate::media::MediaKind;

/// Re-encodes the GoPro files an import queued, one at a time
pub struct ConversionExecutor {
    registry: JobRegistry,
    transcoder: Transcoder,
    probe: FFProbe,
}

impl ConversionExecutor {
    pub fn new(registry: JobRegistry, transcoder: Transcoder, probe: FFProbe) -> Self {
        Self { registry, transcoder, probe }
    }

    /// Verify the transcoder can run. When it cannot, the job is marked
    /// failed before any file is touched and `false` is returned.
    pub async fn preflight(&self, job_id: &str) -> Result<bool> {
        let status = self.transcoder.status().await;
        if status.available {
            debug!("Transcoder ready: {}", status.version.as_deref().unwrap_or("unknown version"));
            return Ok(true);
        }

        error!("❌ FFmpeg not available at {}", status.path.display());
        self.registry
            .update(
                job_id,
                JobUpdate::status(JobStatus::Failed)
                    .with_error(format!("FFmpeg not available at {}", status.path.display())),
            )
            .await?;
        Ok(false)
    }

    /// Convert every target of `plan` under job `job_id`. A failed file is
    /// recorded and the loop moves on; the job always ends completed.
    /// The parent import job is completed once this job is done.
    pub async fn run(&self, job_id: &str, parent_id: Option<&str>, plan: &ConversionPlan) -> Result<JobSummary> {
        info!(
            "🎬 Conversion job {}: {} file(s) with preset {} into {}",
            job_id,
            plan.targets.len(),
            plan.preset.id(),
            plan.output_dir.display()
        );
        self.registry
            .update(job_id, JobUpdate::status(JobStatus::Running))
            .await?;

        if let Err(e) = tokio::fs::create_dir_all(&plan.output_dir).await {
            warn!("Failed to create output folder {}: {}", plan.output_dir.display(), e);
        }

        let extension = plan.preset.settings().extension;
        let mut counter = plan.start_counter;
        let mut summary = JobSummary::default();

        for (i, input) in plan.targets.iter().enumerate() {
            let file_name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.registry
                .update(job_id, JobUpdate::default().with_current_item(Some(file_name.clone())))
                .await?;

            let output = output_path(&plan.output_dir, &plan.file_prefix, counter, input, extension);
            match self.convert_one(job_id, &file_name, input, &output, plan).await {
                Ok(()) => {
                    info!("✅ Converted {} -> {}", input.display(), output.display());
                    summary.record_success(MediaKind::GoproVideo);
                    if !plan.file_prefix.is_empty() {
                        counter = counter.saturating_add(1);
                    }
                    if plan.delete_originals {
                        if let Err(e) = tokio::fs::remove_file(input).await {
                            warn!("Converted but could not remove original {}: {}", input.display(), e);
                        }
                    }
                }
                Err(e) => {
                    error!("❌ Conversion failed for {}: {:#}", input.display(), e);
                    summary.record_failure(MediaKind::GoproVideo, file_name.clone(), format!("{:#}", e));
                }
            }

            self.registry
                .update(
                    job_id,
                    JobUpdate::default()
                        .with_completed(i + 1)
                        .with_current_item(Some(file_name))
                        .with_summary(summary.clone()),
                )
                .await?;
        }

        info!(
            "✅ Conversion job {} done: {} converted, {} failed",
            job_id,
            summary.succeeded(),
            summary.failed()
        );
        self.registry
            .update(job_id, JobUpdate::status(JobStatus::Completed).with_summary(summary.clone()))
            .await?;

        if let Some(parent) = parent_id {
            self.complete_parent(parent).await;
        }
        Ok(summary)
    }

    async fn convert_one(
        &self,
        job_id: &str,
        file_name: &str,
        input: &Path,
        output: &Path,
        plan: &ConversionPlan,
    ) -> Result<()> {
        let duration = match self.probe.probe(input).await {
            Ok(data) => data.duration_secs(),
            Err(e) => {
                debug!("No duration for {}: {}", input.display(), e);
                None
            }
        };

        let (tx, mut rx) = watch::channel(0.0f64);
        let forwarder = {
            let registry = self.registry.clone();
            let job_id = job_id.to_string();
            let file_name = file_name.to_string();
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    let pct = *rx.borrow_and_update();
                    let label = format!("{} ({:.0}%)", file_name, pct);
                    if registry
                        .update(&job_id, JobUpdate::default().with_current_item(Some(label)))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            })
        };

        let result = self
            .transcoder
            .convert(plan.preset, input, output, duration, duration.map(|_| tx))
            .await;
        // no late label may land after the per-file update
        forwarder.abort();
        let _ = forwarder.await;

        let outcome = result?;
        if outcome.success {
            Ok(())
        } else {
            let _ = tokio::fs::remove_file(output).await;
            Err(anyhow::anyhow!(
                "FFmpeg exited with code {}: {}",
                outcome.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()),
                outcome.stderr
            ))
        }
    }

    /// Move a pending import on to completed
    pub async fn complete_parent(&self, parent_id: &str) {
        if let Err(e) = self.registry.complete_pending(parent_id).await {
            warn!("Could not complete import job {}: {}", parent_id, e);
        }
    }
}

/// Destination for one converted file
pub fn output_path(dir: &Path, prefix: &str, counter: u32, input: &Path, extension: &str) -> PathBuf {
    if prefix.is_empty() {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "converted".to_string());
        unique_path(dir, &stem, extension)
    } else {
        unique_path(dir, &format!("{}_{:04}", prefix, counter), extension)
    }
}
