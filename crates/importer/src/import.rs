use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use crate::job::{ConversionPlan, JobRegistry, JobStatus, JobSummary, JobUpdate};
use crate::media::{MediaKind, PROJECT_SUBDIRS};
use crate::preset::ConversionPreset;
use crate::scan::{ScanResult, SourceFile};

/// Name of the per-project metadata file
pub const METADATA_FILE: &str = ".metadata.json";

fn default_true() -> bool {
    true
}

/// What to import and how
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOptions {
    pub source_path: PathBuf,
    pub project_name: String,
    /// Renames files to `<prefix>_<NNNN>.<ext>` when non-empty
    #[serde(default)]
    pub file_prefix: String,
    #[serde(default)]
    pub notes: String,
    /// Sort into RAW/JPEG/Video/Other sub-folders
    #[serde(default = "default_true")]
    pub organize: bool,
    /// Re-encode GoPro footage after copying
    #[serde(default)]
    pub convert: bool,
    /// Preset id for conversion (config default when None)
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub delete_originals: bool,
    /// Allow adding to a project that already exists
    #[serde(default)]
    pub merge_into_existing: bool,
    /// None imports everything; Some(empty) imports no raw or JPEG files
    #[serde(default)]
    pub selected_dates: Option<BTreeSet<NaiveDate>>,
}

impl ImportOptions {
    pub fn new(source_path: impl Into<PathBuf>, project_name: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            project_name: project_name.into(),
            file_prefix: String::new(),
            notes: String::new(),
            organize: true,
            convert: false,
            preset: None,
            delete_originals: false,
            merge_into_existing: false,
            selected_dates: None,
        }
    }
}

/// Files an import will process, in scan order.
///
/// A date filter only applies to raw and JPEG files, the kinds date groups
/// are built from: those must be dated inside the set (an empty set selects
/// none of them). Videos and other files are always eligible.
pub fn select_eligible<'a>(scan: &'a ScanResult, dates: Option<&BTreeSet<NaiveDate>>) -> Vec<&'a SourceFile> {
    match dates {
        None => scan.files().collect(),
        Some(dates) => scan
            .files()
            .filter(|f| !f.kind.is_still() || f.capture_date.map(|d| dates.contains(&d)).unwrap_or(false))
            .collect(),
    }
}

/// Hands out destination names, continuing `<prefix>_<N>` numbering per folder
pub struct NameAllocator {
    prefix: String,
    counters: HashMap<PathBuf, u32>,
}

impl NameAllocator {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            counters: HashMap::new(),
        }
    }

    /// Counter that the next prefixed file in `dir` would use
    pub fn peek(&mut self, dir: &Path) -> u32 {
        let prefix = self.prefix.clone();
        *self
            .counters
            .entry(dir.to_path_buf())
            .or_insert_with(|| next_free_number(dir, &prefix))
    }

    /// Collision-free destination for `original_name` (with `ext`) in `dir`
    pub fn destination(&mut self, dir: &Path, original_name: &str, ext: &str) -> PathBuf {
        if self.prefix.is_empty() {
            let stem = Path::new(original_name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| original_name.to_string());
            let ext = Path::new(original_name)
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            unique_path(dir, &stem, &ext)
        } else {
            let number = self.peek(dir);
            unique_path(dir, &format!("{}_{:04}", self.prefix, number), ext)
        }
    }

    /// Advance the folder counter after a file was written
    pub fn commit(&mut self, dir: &Path) {
        if !self.prefix.is_empty() {
            // saturates; unique_path resolves the repeated name
            let next = self.peek(dir).saturating_add(1);
            self.counters.insert(dir.to_path_buf(), next);
        }
    }
}

/// Highest `<prefix>_<N>` already present in `dir`, plus one
pub fn next_free_number(dir: &Path, prefix: &str) -> u32 {
    if prefix.is_empty() {
        return 1;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 1;
    };

    let wanted = format!("{}_", prefix);
    let max = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| !name.starts_with('.'))
        .filter_map(|name| {
            let stem = Path::new(&name).file_stem()?.to_str()?.to_string();
            let rest = stem.strip_prefix(&wanted)?;
            // "<prefix>_0007" or a collision variant "<prefix>_0007_1"
            rest.split('_').next()?.parse::<u32>().ok()
        })
        .max()
        .unwrap_or(0);
    max.saturating_add(1)
}

/// `dir/stem.ext`, or `dir/stem_1.ext`, `dir/stem_2.ext`, ... if taken
pub fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let file_name = |stem: &str| {
        if ext.is_empty() {
            stem.to_string()
        } else {
            format!("{}.{}", stem, ext.trim_start_matches('.'))
        }
    };

    let mut candidate = dir.join(file_name(stem));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(file_name(&format!("{}_{}", stem, n)));
        n += 1;
    }
    candidate
}

/// Create or refresh the project folder before any file is copied.
///
/// Existing content is left in place; the metadata file keeps every field
/// it already has apart from the ones an import owns.
pub fn prepare_project(project_path: &Path, options: &ImportOptions) -> Result<()> {
    if project_path.exists() && !project_path.is_dir() {
        bail!("Project path is not a directory: {}", project_path.display());
    }

    std::fs::create_dir_all(project_path)
        .with_context(|| format!("Failed to create project directory: {}", project_path.display()))?;
    if options.organize {
        for subdir in PROJECT_SUBDIRS {
            let path = project_path.join(subdir);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create project folder: {}", path.display()))?;
        }
    }

    let metadata_path = project_path.join(METADATA_FILE);
    let now = Utc::now().to_rfc3339();
    let mut metadata = match std::fs::read_to_string(&metadata_path) {
        Ok(content) => match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!("Unreadable project metadata, rewriting: {}", metadata_path.display());
                Map::new()
            }
        },
        Err(_) => Map::new(),
    };

    if metadata.is_empty() {
        metadata.insert("created".into(), json!(now));
        metadata.insert("project_name".into(), json!(options.project_name));
        metadata.insert("import_source".into(), json!(options.source_path.display().to_string()));
        metadata.insert("notes".into(), json!(options.notes));
        metadata.insert("culled_files".into(), json!([]));
        metadata.insert("session_notes".into(), json!([]));
    } else if !options.notes.is_empty() {
        metadata.insert("notes".into(), json!(options.notes));
    }
    metadata.insert("last_import".into(), json!(now));

    let content = serde_json::to_string_pretty(&Value::Object(metadata))
        .context("Failed to serialize project metadata")?;
    std::fs::write(&metadata_path, content)
        .with_context(|| format!("Failed to write project metadata: {}", metadata_path.display()))?;
    Ok(())
}

/// Result handed back when an import run finishes
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub summary: JobSummary,
    /// Present when GoPro files were queued for conversion
    pub conversion_plan: Option<ConversionPlan>,
}

/// Copies the selected files of a scan into a project, one job per run
pub struct ImportExecutor {
    registry: JobRegistry,
    default_preset: String,
}

impl ImportExecutor {
    pub fn new(registry: JobRegistry, default_preset: String) -> Self {
        Self { registry, default_preset }
    }

    /// Process `files` into `project_path`, updating job `job_id` after
    /// every file. Per-file failures are recorded and never stop the run.
    pub async fn run(
        &self,
        job_id: &str,
        options: &ImportOptions,
        files: &[SourceFile],
        project_path: &Path,
    ) -> Result<ImportOutcome> {
        info!(
            "📥 Import job {}: {} file(s) from {} into {}",
            job_id,
            files.len(),
            options.source_path.display(),
            project_path.display()
        );
        self.registry
            .update(job_id, JobUpdate::status(JobStatus::Running))
            .await?;

        let mut names = NameAllocator::new(&options.file_prefix);
        let mut summary = JobSummary::default();
        let mut gopro_targets = Vec::new();

        for (i, file) in files.iter().enumerate() {
            let file_name = file.file_name();

            if file.kind == MediaKind::GoproVideo && options.convert {
                debug!("Queued GoPro file for conversion: {}", file_name);
                summary.queued_for_conversion += 1;
                gopro_targets.push(file.path.clone());
            } else {
                let dir = destination_dir(project_path, file.kind, options.organize);
                match copy_one(file, &dir, &mut names, options.delete_originals).await {
                    Ok(dest) => {
                        debug!("Imported {} -> {}", file.path.display(), dest.display());
                        summary.record_success(file.kind);
                    }
                    Err(e) => {
                        error!("❌ Failed to import {}: {:#}", file.path.display(), e);
                        summary.record_failure(file.kind, file_name.clone(), format!("{:#}", e));
                    }
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

        let conversion_plan = if gopro_targets.is_empty() {
            None
        } else {
            let output_dir = destination_dir(project_path, MediaKind::GoproVideo, options.organize);
            let preset_name = options.preset.as_deref().unwrap_or(&self.default_preset);
            Some(ConversionPlan {
                targets: gopro_targets,
                preset: ConversionPreset::resolve(preset_name),
                start_counter: names.peek(&output_dir),
                output_dir,
                file_prefix: options.file_prefix.clone(),
                delete_originals: options.delete_originals,
            })
        };

        let status = if conversion_plan.is_some() {
            JobStatus::PendingConversion
        } else {
            JobStatus::Completed
        };

        info!(
            "✅ Import job {} done: {} imported, {} failed, {} queued for conversion",
            job_id,
            summary.succeeded(),
            summary.failed(),
            summary.queued_for_conversion
        );

        self.registry
            .update(
                job_id,
                JobUpdate::status(status)
                    .with_summary(summary.clone())
                    .with_conversion_plan(conversion_plan.clone()),
            )
            .await?;

        Ok(ImportOutcome { summary, conversion_plan })
    }
}

/// Folder a file of `kind` lands in
pub fn destination_dir(project_path: &Path, kind: MediaKind, organize: bool) -> PathBuf {
    if organize {
        project_path.join(kind.project_subdir())
    } else {
        project_path.to_path_buf()
    }
}

/// Copy, verify by length, then optionally remove the source
async fn copy_one(
    file: &SourceFile,
    dir: &Path,
    names: &mut NameAllocator,
    delete_original: bool,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create folder: {}", dir.display()))?;

    let dest = names.destination(dir, &file.file_name(), &file.extension);

    let source_len = tokio::fs::metadata(&file.path)
        .await
        .with_context(|| format!("Failed to stat source: {}", file.path.display()))?
        .len();
    let copied = tokio::fs::copy(&file.path, &dest)
        .await
        .with_context(|| format!("Failed to copy {} to {}", file.path.display(), dest.display()))?;

    if copied != source_len {
        let _ = tokio::fs::remove_file(&dest).await;
        bail!("Copy verification failed: {} of {} bytes written", copied, source_len);
    }
    names.commit(dir);

    if delete_original {
        if let Err(e) = tokio::fs::remove_file(&file.path).await {
            warn!("Copied but could not remove original {}: {}", file.path.display(), e);
        }
    }

    Ok(dest)
}
