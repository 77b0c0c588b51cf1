use std::any::Any;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use log::{error, info, warn};
use serde::Serialize;
use crate::config::ImporterConfig;
use crate::convert::ConversionExecutor;
use crate::error::{ImportError, ImportResult};
use crate::estimate::{self, SizeEstimate};
use crate::ffmpeg::{Transcoder, TranscoderStatus};
use crate::ffprobe::FFProbe;
use crate::import::{self, ImportExecutor, ImportOptions};
use crate::job::{ConversionPlan, Job, JobKind, JobRegistry, JobStatus, JobUpdate};
use crate::preset::{self, PresetSettings};
use crate::preview::{Preview, PreviewCache, PreviewHandle};
use crate::scan::{self, ScanResult, SourceFile};

/// One date group as shown to a user picking what to import
#[derive(Debug, Clone, Serialize)]
pub struct DatePreview {
    pub date: NaiveDate,
    pub total_count: usize,
    pub raw_count: usize,
    pub jpeg_count: usize,
    pub samples: Vec<PreviewHandle>,
}

/// Entry point for every import operation.
///
/// Cheap to clone; clones share the job registry and the preview cache.
#[derive(Clone)]
pub struct Importer {
    config: Arc<ImporterConfig>,
    registry: JobRegistry,
    previews: Arc<PreviewCache>,
    transcoder: Transcoder,
    probe: FFProbe,
}

enum ConversionClaim {
    Existing(String),
    Claimed(ConversionPlan),
    Nothing,
}

impl Importer {
    pub fn new(config: ImporterConfig) -> Self {
        Self {
            registry: JobRegistry::new(config.job_retention_secs),
            previews: Arc::new(PreviewCache::new(config.preview_edge)),
            transcoder: Transcoder::new(config.ffmpeg_bin.clone(), config.transcode_timeout_secs),
            probe: FFProbe::new(config.ffprobe_bin.clone()),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ImporterConfig {
        &self.config
    }

    /// Enumerate and classify everything under `source`
    pub async fn scan(&self, source: &Path) -> ImportResult<ScanResult> {
        if !source.exists() {
            return Err(ImportError::SourceNotFound(source.to_path_buf()));
        }
        if !source.is_dir() {
            return Err(ImportError::NotADirectory(source.to_path_buf()));
        }

        let root = source.to_path_buf();
        let samples = self.config.preview_samples;
        let mut result = tokio::task::spawn_blocking(move || scan::scan_source(&root, samples))
            .await
            .map_err(|e| anyhow!("Scan task failed: {}", e))??;

        if self.config.probe_video_tags && !result.video.is_empty() {
            scan::flag_gopro_by_tags(&mut result, &self.probe).await;
        }
        Ok(result)
    }

    /// Date groups of `source`, with their sample previews rendered into the cache
    pub async fn date_preview(&self, source: &Path) -> ImportResult<Vec<DatePreview>> {
        let result = self.scan(source).await?;

        let mut groups = Vec::with_capacity(result.date_groups.len());
        for group in result.date_groups {
            let mut samples = Vec::with_capacity(group.samples.len());
            for file in &group.samples {
                let preview = self.previews.get_or_render(&file.path).await;
                samples.push(PreviewHandle {
                    path: file.path.clone(),
                    file_name: file.file_name(),
                    kind: file.kind,
                    placeholder: preview.placeholder,
                });
            }
            groups.push(DatePreview {
                date: group.date,
                total_count: group.total_count,
                raw_count: group.raw_count,
                jpeg_count: group.jpeg_count,
                samples,
            });
        }
        Ok(groups)
    }

    /// Rendered preview of one file, from the cache when possible
    pub async fn preview_image(&self, path: &Path) -> Preview {
        self.previews.get_or_render(path).await
    }

    pub async fn clear_preview_cache(&self) -> usize {
        self.previews.clear().await
    }

    /// Projected size of importing `scan` with `preset` against the free
    /// space of the library disk
    pub fn estimate_size(&self, scan: &ScanResult, preset: &str) -> SizeEstimate {
        let bytes = estimate::estimate_bytes(scan, preset);
        SizeEstimate::new(bytes, estimate::free_space(&self.config.library_root))
    }

    /// Validate `options`, prepare the project and start the import in the
    /// background. Rejections happen here, before any job exists.
    pub async fn start_import(&self, options: ImportOptions) -> ImportResult<String> {
        validate_project_name(&options.project_name)?;
        let project_path = self.config.project_path(&options.project_name);
        if project_path.exists() && !options.merge_into_existing {
            return Err(ImportError::ProjectExists(options.project_name.clone()));
        }

        let result = self.scan(&options.source_path).await?;
        let files: Vec<SourceFile> = import::select_eligible(&result, options.selected_dates.as_ref())
            .into_iter()
            .cloned()
            .collect();

        import::prepare_project(&project_path, &options)
            .with_context(|| format!("Failed to prepare project {}", options.project_name))?;

        let job_id = self.registry.create(JobKind::Import, files.len()).await;
        info!(
            "Queued import {} of {} file(s) into project {}",
            job_id,
            files.len(),
            options.project_name
        );

        let importer = self.clone();
        let id = job_id.clone();
        spawn_job(self.registry.clone(), job_id.clone(), None, async move {
            let executor = ImportExecutor::new(importer.registry.clone(), importer.config.default_preset.clone());
            match executor.run(&id, &options, &files, &project_path).await {
                Ok(outcome) => {
                    if outcome.conversion_plan.is_some() && importer.config.auto_start_conversion {
                        if let Err(e) = importer.start_conversion(&id).await {
                            error!("Could not start conversion for import {}: {}", id, e);
                        }
                    }
                }
                Err(e) => {
                    error!("❌ Import job {} failed: {:#}", id, e);
                    let update = JobUpdate::status(JobStatus::Failed).with_error(format!("{:#}", e));
                    if let Err(e) = importer.registry.update(&id, update).await {
                        warn!("Could not mark import {} failed: {}", id, e);
                    }
                }
            }
        });

        Ok(job_id)
    }

    /// Start converting the GoPro files queued by import `job_id`.
    ///
    /// Returns the conversion job id, the existing one when a conversion was
    /// already started, or None when the import queued nothing. When the
    /// transcoder is unavailable the returned job is already failed.
    pub async fn start_conversion(&self, job_id: &str) -> ImportResult<Option<String>> {
        let claim = self
            .registry
            .modify(job_id, |job| {
                if job.kind != JobKind::Import {
                    return Err(ImportError::InvalidState(format!("{} is not an import job", job.id)));
                }
                if let Some(existing) = &job.conversion_job_id {
                    return Ok(ConversionClaim::Existing(existing.clone()));
                }
                match job.status {
                    JobStatus::Queued | JobStatus::Running => Err(ImportError::InvalidState(format!(
                        "import {} is still running",
                        job.id
                    ))),
                    _ => Ok(match job.conversion_plan.take() {
                        Some(plan) => ConversionClaim::Claimed(plan),
                        None => ConversionClaim::Nothing,
                    }),
                }
            })
            .await??;

        let plan = match claim {
            ConversionClaim::Existing(id) => return Ok(Some(id)),
            ConversionClaim::Nothing => return Ok(None),
            ConversionClaim::Claimed(plan) => plan,
        };

        let conversion_id = self
            .registry
            .create_with(JobKind::Conversion, plan.targets.len(), Some(job_id.to_string()))
            .await;
        self.registry
            .update(&conversion_id, JobUpdate::default().with_conversion_plan(Some(plan.clone())))
            .await?;
        self.registry
            .modify(job_id, |job| job.conversion_job_id = Some(conversion_id.clone()))
            .await?;

        let executor = ConversionExecutor::new(self.registry.clone(), self.transcoder.clone(), self.probe.clone());
        if !executor.preflight(&conversion_id).await? {
            executor.complete_parent(job_id).await;
            return Ok(Some(conversion_id));
        }

        let registry = self.registry.clone();
        let parent = job_id.to_string();
        let id = conversion_id.clone();
        spawn_job(self.registry.clone(), conversion_id.clone(), Some(parent.clone()), async move {
            if let Err(e) = executor.run(&id, Some(&parent), &plan).await {
                error!("❌ Conversion job {} failed: {:#}", id, e);
                let update = JobUpdate::status(JobStatus::Failed).with_error(format!("{:#}", e));
                if let Err(e) = registry.update(&id, update).await {
                    warn!("Could not mark conversion {} failed: {}", id, e);
                }
                executor.complete_parent(&parent).await;
            }
        });

        Ok(Some(conversion_id))
    }

    pub async fn get_job(&self, job_id: &str) -> ImportResult<Job> {
        self.registry
            .get(job_id)
            .await
            .ok_or_else(|| ImportError::JobNotFound(job_id.to_string()))
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        self.registry.list().await
    }

    pub fn presets(&self) -> Vec<PresetSettings> {
        preset::presets()
    }

    pub async fn transcoder_status(&self) -> TranscoderStatus {
        self.transcoder.status().await
    }
}

/// Run a job's work in the background. If the work panics, the job is
/// marked failed and a waiting parent import is completed.
fn spawn_job<F>(registry: JobRegistry, job_id: String, parent_id: Option<String>, work: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(work);
    tokio::spawn(async move {
        let Err(e) = handle.await else {
            return;
        };
        if !e.is_panic() {
            return;
        }

        let message = panic_message(e.into_panic());
        error!("❌ Job {} panicked: {}", job_id, message);
        let update = JobUpdate::status(JobStatus::Failed).with_error(format!("Job task panicked: {}", message));
        if let Err(e) = registry.update(&job_id, update).await {
            warn!("Could not mark job {} failed: {}", job_id, e);
        }
        if let Some(parent) = parent_id {
            if let Err(e) = registry.complete_pending(&parent).await {
                warn!("Could not complete import job {}: {}", parent, e);
            }
        }
    });
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Project names are a single path component inside the library
fn validate_project_name(name: &str) -> ImportResult<()> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\'])
        || trimmed != name
    {
        return Err(ImportError::InvalidProjectName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};

    fn write_dated(path: &Path, bytes: &[u8], date: (i32, u32, u32)) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
        let noon = Local.with_ymd_and_hms(date.0, date.1, date.2, 12, 0, 0).unwrap();
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::from(noon))
            .unwrap();
    }

    fn importer(library: &Path, ffmpeg: PathBuf) -> Importer {
        Importer::new(ImporterConfig {
            library_root: library.to_path_buf(),
            ffmpeg_bin: ffmpeg,
            ffprobe_bin: PathBuf::from("/nonexistent/ffprobe"),
            ..ImporterConfig::default_config()
        })
    }

    async fn wait_for(importer: &Importer, id: &str, done: impl Fn(&Job) -> bool) -> Job {
        for _ in 0..500 {
            let job = importer.get_job(id).await.unwrap();
            if done(&job) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not reach the expected state", id);
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_date_selection_end_to_end() {
        let src = tempfile::tempdir().unwrap();
        let lib = tempfile::tempdir().unwrap();
        for i in 0..3 {
            write_dated(&src.path().join(format!("may1_{}.jpg", i)), b"jpeg", (2024, 5, 1));
        }
        for i in 0..2 {
            write_dated(&src.path().join(format!("may2_{}.jpg", i)), b"jpeg", (2024, 5, 2));
        }
        let importer = importer(lib.path(), PathBuf::from("/nonexistent/ffmpeg"));

        let groups = importer.date_preview(src.path()).await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!((groups[0].date, groups[0].total_count), (date(2024, 5, 1), 3));
        assert_eq!((groups[1].date, groups[1].total_count), (date(2024, 5, 2), 2));
        // not real JPEG data
        assert!(groups[0].samples.iter().all(|s| s.placeholder));
        assert_eq!(importer.clear_preview_cache().await, 5);

        let mut options = ImportOptions::new(src.path(), "may");
        options.selected_dates = Some(BTreeSet::from([date(2024, 5, 1)]));
        let id = importer.start_import(options).await.unwrap();

        let job = wait_for(&importer, &id, |j| j.status.is_terminal()).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.total, 3);
        assert_eq!(job.summary.jpeg.succeeded, 3);
        assert_eq!(fs::read_dir(lib.path().join("may/JPEG")).unwrap().count(), 3);
    }

    #[tokio::test]
    async fn test_rejections_before_job_creation() {
        let src = tempfile::tempdir().unwrap();
        let lib = tempfile::tempdir().unwrap();
        write_dated(&src.path().join("a.jpg"), b"a", (2024, 1, 1));
        let importer = importer(lib.path(), PathBuf::from("/nonexistent/ffmpeg"));

        let missing = ImportOptions::new(src.path().join("nope"), "p");
        assert!(matches!(importer.start_import(missing).await, Err(ImportError::SourceNotFound(_))));

        let file = ImportOptions::new(src.path().join("a.jpg"), "p");
        assert!(matches!(importer.start_import(file).await, Err(ImportError::NotADirectory(_))));

        let escape = ImportOptions::new(src.path(), "../outside");
        assert!(matches!(importer.start_import(escape).await, Err(ImportError::InvalidProjectName(_))));

        fs::create_dir_all(lib.path().join("taken")).unwrap();
        let taken = ImportOptions::new(src.path(), "taken");
        assert!(matches!(importer.start_import(taken).await, Err(ImportError::ProjectExists(_))));

        assert!(importer.list_jobs().await.is_empty());
        assert!(matches!(importer.get_job("missing").await, Err(ImportError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_merge_continues_numbering() {
        let src = tempfile::tempdir().unwrap();
        let lib = tempfile::tempdir().unwrap();
        write_dated(&src.path().join("a.jpg"), b"a", (2024, 1, 1));
        write_dated(&src.path().join("b.jpg"), b"b", (2024, 1, 1));
        let importer = importer(lib.path(), PathBuf::from("/nonexistent/ffmpeg"));

        let mut options = ImportOptions::new(src.path(), "trip");
        options.file_prefix = "trip".into();
        let first = importer.start_import(options.clone()).await.unwrap();
        wait_for(&importer, &first, |j| j.status.is_terminal()).await;

        options.merge_into_existing = true;
        let second = importer.start_import(options).await.unwrap();
        wait_for(&importer, &second, |j| j.status.is_terminal()).await;

        let mut names: Vec<String> = fs::read_dir(lib.path().join("trip/JPEG"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["trip_0001.jpg", "trip_0002.jpg", "trip_0003.jpg", "trip_0004.jpg"]);
        assert_eq!(importer.list_jobs().await.len(), 2);
    }

    #[tokio::test]
    async fn test_estimate_copy_is_source_size() {
        let src = tempfile::tempdir().unwrap();
        let lib = tempfile::tempdir().unwrap();
        write_dated(&src.path().join("GH010001.MP4"), &[0u8; 300], (2024, 1, 1));
        write_dated(&src.path().join("a.jpg"), &[0u8; 50], (2024, 1, 1));
        let importer = importer(lib.path(), PathBuf::from("/nonexistent/ffmpeg"));

        let scan = importer.scan(src.path()).await.unwrap();
        assert_eq!(importer.estimate_size(&scan, "copy").estimated_bytes, 350);
        assert_eq!(importer.estimate_size(&scan, "no_such_preset").estimated_bytes, 350);
        assert_eq!(importer.estimate_size(&scan, "dnxhd_1080p").estimated_bytes, 300 * 17 + 50);
    }

    #[tokio::test]
    async fn test_conversion_without_transcoder_fails_immediately() {
        let src = tempfile::tempdir().unwrap();
        let lib = tempfile::tempdir().unwrap();
        write_dated(&src.path().join("GH010001.MP4"), b"gopro", (2024, 1, 1));
        let mut config = ImporterConfig {
            library_root: lib.path().to_path_buf(),
            ffmpeg_bin: PathBuf::from("/nonexistent/ffmpeg"),
            ..ImporterConfig::default_config()
        };
        config.auto_start_conversion = false;
        let importer = Importer::new(config);

        let mut options = ImportOptions::new(src.path(), "gopro");
        options.convert = true;
        let id = importer.start_import(options).await.unwrap();
        let job = wait_for(&importer, &id, |j| j.status == JobStatus::PendingConversion).await;
        assert_eq!(job.summary.queued_for_conversion, 1);

        let conversion = importer.start_conversion(&id).await.unwrap().unwrap();
        let failed = importer.get_job(&conversion).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.completed, 0);
        assert_eq!(failed.parent_job_id.as_deref(), Some(id.as_str()));

        // a second request returns the same job
        assert_eq!(importer.start_conversion(&id).await.unwrap(), Some(conversion.clone()));
        let parent = importer.get_job(&id).await.unwrap();
        assert_eq!(parent.status, JobStatus::Completed);
        assert_eq!(parent.conversion_job_id, Some(conversion));
        assert!(matches!(
            importer.start_conversion("missing").await,
            Err(ImportError::JobNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_gopro_import_auto_converts() {
        let src = tempfile::tempdir().unwrap();
        let lib = tempfile::tempdir().unwrap();
        write_dated(&src.path().join("GH010001.MP4"), b"gopro", (2024, 1, 1));
        write_dated(&src.path().join("a.jpg"), b"jpeg", (2024, 1, 1));
        let importer = importer(lib.path(), crate::test_support::stub_ffmpeg());
        assert!(importer.transcoder_status().await.available);

        let mut options = ImportOptions::new(src.path(), "hike");
        options.convert = true;
        let id = importer.start_import(options).await.unwrap();

        let parent = wait_for(&importer, &id, |j| j.status == JobStatus::Completed).await;
        let conversion_id = parent.conversion_job_id.unwrap();
        let conversion = wait_for(&importer, &conversion_id, |j| j.status.is_terminal()).await;
        assert_eq!(conversion.status, JobStatus::Completed);
        assert_eq!(conversion.kind, JobKind::Conversion);
        assert_eq!(conversion.summary.gopro.succeeded, 1);
        assert!(lib.path().join("hike/Video/GH010001.mov").exists());
        assert!(lib.path().join("hike/JPEG/a.jpg").exists());
    }

    #[tokio::test]
    async fn test_panicking_job_is_marked_failed() {
        let registry = JobRegistry::new(3600);
        let parent = registry.create(JobKind::Import, 1).await;
        registry
            .update(&parent, JobUpdate::status(JobStatus::PendingConversion))
            .await
            .unwrap();
        let id = registry.create_with(JobKind::Conversion, 1, Some(parent.clone())).await;
        registry.update(&id, JobUpdate::status(JobStatus::Running)).await.unwrap();

        spawn_job(registry.clone(), id.clone(), Some(parent.clone()), async {
            let counter = u32::MAX;
            if counter.checked_add(1).is_none() {
                panic!("counter exhausted");
            }
        });

        let mut job = registry.get(&id).await.unwrap();
        for _ in 0..500 {
            if job.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            job = registry.get(&id).await.unwrap();
        }
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("counter exhausted"));
        assert_eq!(registry.get(&parent).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_existing_max_counter_does_not_strand_import() {
        let src = tempfile::tempdir().unwrap();
        let lib = tempfile::tempdir().unwrap();
        write_dated(&src.path().join("a.jpg"), b"a", (2024, 1, 1));
        write_dated(&src.path().join("b.jpg"), b"b", (2024, 1, 1));
        write_dated(&lib.path().join("trip/JPEG/trip_4294967295.jpg"), b"old", (2024, 1, 1));
        let importer = importer(lib.path(), PathBuf::from("/nonexistent/ffmpeg"));

        let mut options = ImportOptions::new(src.path(), "trip");
        options.file_prefix = "trip".into();
        options.merge_into_existing = true;
        let id = importer.start_import(options).await.unwrap();

        let job = wait_for(&importer, &id, |j| j.status.is_terminal()).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.summary.jpeg.succeeded, 2);
        assert!(lib.path().join("trip/JPEG/trip_4294967295_1.jpg").exists());
        assert!(lib.path().join("trip/JPEG/trip_4294967295_2.jpg").exists());
    }

    #[test]
    fn test_project_name_validation() {
        assert!(validate_project_name("Iceland 2024").is_ok());
        for bad in ["", " ", ".", "..", "a/b", "a\\b", " padded"] {
            assert!(validate_project_name(bad).is_err(), "{:?} accepted", bad);
        }
    }
}
