use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;
use crate::error::{ImportError, ImportResult};
use crate::media::MediaKind;
use crate::preset::ConversionPreset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Import,
    Conversion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    PendingConversion,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Success/failure tally for one category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub file: String,
    pub error: String,
}

/// Aggregated result of a job, per category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub raw: CategoryCounts,
    pub jpeg: CategoryCounts,
    pub video: CategoryCounts,
    pub gopro: CategoryCounts,
    pub other: CategoryCounts,
    /// GoPro files handed over to the conversion job instead of copied
    pub queued_for_conversion: usize,
    pub failures: Vec<FileFailure>,
}

impl JobSummary {
    pub fn counts_mut(&mut self, kind: MediaKind) -> &mut CategoryCounts {
        match kind {
            MediaKind::Raw => &mut self.raw,
            MediaKind::Jpeg => &mut self.jpeg,
            MediaKind::Video => &mut self.video,
            MediaKind::GoproVideo => &mut self.gopro,
            MediaKind::Other => &mut self.other,
        }
    }

    pub fn record_success(&mut self, kind: MediaKind) {
        self.counts_mut(kind).succeeded += 1;
    }

    pub fn record_failure(&mut self, kind: MediaKind, file: impl Into<String>, error: impl Into<String>) {
        self.counts_mut(kind).failed += 1;
        self.failures.push(FileFailure {
            file: file.into(),
            error: error.into(),
        });
    }

    fn all(&self) -> [&CategoryCounts; 5] {
        [&self.raw, &self.jpeg, &self.video, &self.gopro, &self.other]
    }

    pub fn succeeded(&self) -> usize {
        self.all().iter().map(|c| c.succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.all().iter().map(|c| c.failed).sum()
    }
}

/// Work handed from a finished import to its conversion job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionPlan {
    pub targets: Vec<PathBuf>,
    pub preset: ConversionPreset,
    pub output_dir: PathBuf,
    pub file_prefix: String,
    /// Next free number in the output folder when a prefix is used
    pub start_counter: u32,
    pub delete_originals: bool,
}

/// Snapshot of one tracked job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total: usize,
    pub completed: usize,
    pub current_item: Option<String>,
    /// Derived from completed/total, 100 when total is 0
    pub progress: f64,
    pub summary: JobSummary,
    /// Why the job failed as a whole
    pub error: Option<String>,
    /// Import job that queued this conversion
    pub parent_job_id: Option<String>,
    /// Conversion job started from this import
    pub conversion_job_id: Option<String>,
    /// GoPro work queued for the conversion job
    pub conversion_plan: Option<ConversionPlan>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    fn new(kind: JobKind, total: usize) -> Self {
        let mut job = Job {
            id: Uuid::new_v4().to_string(),
            kind,
            status: JobStatus::Queued,
            total,
            completed: 0,
            current_item: None,
            progress: 0.0,
            summary: JobSummary::default(),
            error: None,
            parent_job_id: None,
            conversion_job_id: None,
            conversion_plan: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        job.refresh_progress();
        job
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 * 100.0 / self.total as f64
        }
    }

    fn refresh_progress(&mut self) {
        self.progress = self.progress_percent();
    }

    fn set_status(&mut self, status: JobStatus) {
        if status == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if status.is_terminal() {
            self.finished_at = Some(Utc::now());
            self.current_item = None;
        }
        self.status = status;
    }

    /// Merge a partial update; `completed` only ever moves forward and
    /// never past `total`
    pub fn apply(&mut self, update: JobUpdate) {
        if let Some(completed) = update.completed {
            self.completed = completed.max(self.completed).min(self.total);
        }
        if let Some(item) = update.current_item {
            self.current_item = item;
        }
        if let Some(summary) = update.summary {
            self.summary = summary;
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        if let Some(plan) = update.conversion_plan {
            self.conversion_plan = plan;
        }
        if let Some(status) = update.status {
            self.set_status(status);
        }
        self.refresh_progress();
    }
}

/// Partial job fields, merged atomically by [`JobRegistry::update`]
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub completed: Option<usize>,
    pub current_item: Option<Option<String>>,
    pub summary: Option<JobSummary>,
    pub error: Option<String>,
    pub conversion_plan: Option<Option<ConversionPlan>>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_completed(mut self, completed: usize) -> Self {
        self.completed = Some(completed);
        self
    }

    pub fn with_current_item(mut self, item: Option<String>) -> Self {
        self.current_item = Some(item);
        self
    }

    pub fn with_summary(mut self, summary: JobSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_conversion_plan(mut self, plan: Option<ConversionPlan>) -> Self {
        self.conversion_plan = Some(plan);
        self
    }
}

/// Process-wide store of job records.
///
/// Every write happens under the map's write lock, so a reader sees a job
/// either before or after an update, never in between. Finished jobs older
/// than the retention window are dropped whenever a new job is created.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(retention_secs: u64) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            retention: Duration::seconds(retention_secs.min(i64::MAX as u64) as i64),
        }
    }

    /// Register a new queued job and return its id
    pub async fn create(&self, kind: JobKind, total: usize) -> String {
        self.create_with(kind, total, None).await
    }

    pub(crate) async fn create_with(&self, kind: JobKind, total: usize, parent: Option<String>) -> String {
        let mut job = Job::new(kind, total);
        job.parent_job_id = parent;
        let id = job.id.clone();

        let mut jobs = self.jobs.write().await;
        let evicted = self.evict_expired(&mut jobs);
        if evicted > 0 {
            debug!("Evicted {} finished job(s) past retention", evicted);
        }
        jobs.insert(id.clone(), job);
        debug!("Created {:?} job {} (total {})", kind, id, total);
        id
    }

    fn evict_expired(&self, jobs: &mut HashMap<String, Job>) -> usize {
        let cutoff = Utc::now() - self.retention;
        let before = jobs.len();
        jobs.retain(|_, job| match job.finished_at {
            Some(finished) if job.status.is_terminal() => finished > cutoff,
            _ => true,
        });
        before - jobs.len()
    }

    /// Merge `update` into the job and return the new snapshot
    pub async fn update(&self, id: &str, update: JobUpdate) -> ImportResult<Job> {
        self.modify(id, |job| {
            job.apply(update);
            job.clone()
        })
        .await
    }

    /// Run `f` on the job under the write lock
    pub(crate) async fn modify<R>(&self, id: &str, f: impl FnOnce(&mut Job) -> R) -> ImportResult<R> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| ImportError::JobNotFound(id.to_string()))?;
        let out = f(job);
        Ok(out)
    }

    /// Move an import waiting on its conversion to completed
    pub async fn complete_pending(&self, id: &str) -> ImportResult<()> {
        self.modify(id, |job| {
            if job.status == JobStatus::PendingConversion {
                job.apply(JobUpdate::status(JobStatus::Completed));
            }
        })
        .await
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    /// All live jobs, oldest first
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_create_get_update() {
        let registry = JobRegistry::new(3600);
        let id = registry.create(JobKind::Import, 4).await;

        let job = registry.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0.0);

        let job = registry
            .update(&id, JobUpdate::status(JobStatus::Running).with_completed(1).with_current_item(Some("a.jpg".into())))
            .await
            .unwrap();
        assert_eq!(job.completed, 1);
        assert_eq!(job.progress, 25.0);
        assert!(job.started_at.is_some());
        assert_eq!(job.current_item.as_deref(), Some("a.jpg"));

        let job = registry.update(&id, JobUpdate::status(JobStatus::Completed)).await.unwrap();
        assert!(job.finished_at.is_some());
        assert_eq!(job.current_item, None);
        // the returned snapshot is the stored record
        assert_eq!(registry.get(&id).await.unwrap(), job);
    }

    #[tokio::test]
    async fn test_empty_job_is_fully_progressed() {
        let registry = JobRegistry::new(3600);
        let id = registry.create(JobKind::Conversion, 0).await;
        assert_eq!(registry.get(&id).await.unwrap().progress, 100.0);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let registry = JobRegistry::new(3600);
        assert!(registry.get("missing").await.is_none());
        assert!(matches!(
            registry.update("missing", JobUpdate::default()).await,
            Err(ImportError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_finished_jobs_evicted_after_retention() {
        let registry = JobRegistry::new(0);
        let done = registry.create(JobKind::Import, 0).await;
        registry.update(&done, JobUpdate::status(JobStatus::Completed)).await.unwrap();
        let running = registry.create(JobKind::Import, 1).await;
        registry.update(&running, JobUpdate::status(JobStatus::Running)).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let _new = registry.create(JobKind::Import, 1).await;

        assert!(registry.get(&done).await.is_none());
        assert!(registry.get(&running).await.is_some());
        assert_eq!(registry.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_polls_see_monotonic_progress() {
        let registry = JobRegistry::new(3600);
        let id = registry.create(JobKind::Import, 200).await;

        let writer = {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move {
                for n in 1..=200 {
                    registry
                        .update(&id, JobUpdate::default().with_completed(n).with_current_item(Some(format!("file{}", n))))
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut last = 0.0;
        loop {
            let job = registry.get(&id).await.unwrap();
            assert!(job.completed <= job.total);
            assert!(job.progress >= last);
            // label and counter come from the same write
            if job.completed > 0 {
                assert_eq!(job.current_item, Some(format!("file{}", job.completed)));
            }
            last = job.progress;
            if job.completed == 200 {
                break;
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }

    proptest! {
        #[test]
        fn test_completed_never_regresses_or_overflows(
            total in 0usize..50,
            updates in prop::collection::vec(0usize..80, 1..40),
        ) {
            let mut job = Job::new(JobKind::Import, total);
            let mut last = 0.0;
            for n in updates {
                job.apply(JobUpdate::default().with_completed(n));
                prop_assert!(job.completed <= job.total);
                prop_assert!(job.progress >= last || total == 0);
                prop_assert!(job.progress <= 100.0);
                last = job.progress;
            }
        }
    }
}
