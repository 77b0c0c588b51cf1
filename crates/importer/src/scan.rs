use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use anyhow::{bail, Result};
use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use walkdir::{DirEntry, WalkDir};
use crate::capture;
use crate::ffprobe::FFProbe;
use crate::media::{self, MediaKind};

/// One regular file found under the source root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the scanned root
    pub relative_path: PathBuf,
    /// Lowercased extension without the dot ("" when absent)
    pub extension: String,
    pub kind: MediaKind,
    pub size: u64,
    pub capture_date: Option<NaiveDate>,
}

impl SourceFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Still images sharing one capture date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateGroup {
    pub date: NaiveDate,
    /// Bounded preview selection, JPEGs before raws
    pub samples: Vec<SourceFile>,
    pub total_count: usize,
    pub raw_count: usize,
    pub jpeg_count: usize,
}

/// Number of files per classified type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub raw: usize,
    pub jpeg: usize,
    pub video: usize,
    pub gopro: usize,
    pub other: usize,
}

impl KindCounts {
    pub fn total(&self) -> usize {
        self.raw + self.jpeg + self.video + self.gopro + self.other
    }
}

/// Outcome of walking a source directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResult {
    pub root: PathBuf,
    pub counts: KindCounts,
    pub total_size: u64,
    pub raw: Vec<SourceFile>,
    pub jpeg: Vec<SourceFile>,
    pub video: Vec<SourceFile>,
    pub gopro: Vec<SourceFile>,
    pub other: Vec<SourceFile>,
    /// Ascending by date
    pub date_groups: Vec<DateGroup>,
    /// Entries that could not be read and were left out
    pub skipped_entries: usize,
}

impl ScanResult {
    /// Every scanned file, category by category, each list in walk order
    pub fn files(&self) -> impl Iterator<Item = &SourceFile> {
        self.raw
            .iter()
            .chain(self.jpeg.iter())
            .chain(self.video.iter())
            .chain(self.gopro.iter())
            .chain(self.other.iter())
    }

    /// Bytes of the files that a conversion would re-encode
    pub fn gopro_size(&self) -> u64 {
        self.gopro.iter().map(|f| f.size).sum()
    }

    fn push(&mut self, file: SourceFile) {
        self.total_size += file.size;
        match file.kind {
            MediaKind::Raw => {
                self.counts.raw += 1;
                self.raw.push(file);
            }
            MediaKind::Jpeg => {
                self.counts.jpeg += 1;
                self.jpeg.push(file);
            }
            MediaKind::Video => {
                self.counts.video += 1;
                self.video.push(file);
            }
            MediaKind::GoproVideo => {
                self.counts.gopro += 1;
                self.gopro.push(file);
            }
            MediaKind::Other => {
                self.counts.other += 1;
                self.other.push(file);
            }
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Walk `root`, classify every regular file and build the date groups.
///
/// Blocking: reads metadata and EXIF for each still image.
pub fn scan_source(root: &Path, preview_samples: usize) -> Result<ScanResult> {
    if !root.is_dir() {
        bail!("Source is not a readable directory: {}", root.display());
    }

    info!("Scanning source: {}", root.display());

    let mut result = ScanResult {
        root: root.to_path_buf(),
        ..Default::default()
    };
    let mut entry_count = 0usize;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        entry_count += 1;

        // Log progress every 1000 entries
        if entry_count % 1000 == 0 {
            info!("Scanned {} entries so far in {}...", entry_count, root.display());
        }

        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                result.skipped_entries += 1;
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("Failed to stat {}: {}", path.display(), e);
                result.skipped_entries += 1;
                continue;
            }
        };

        let kind = MediaKind::classify(path);
        let capture_date = capture::capture_date(path, kind.is_still(), metadata.modified().ok());
        if kind.is_still() && capture_date.is_none() {
            warn!("No usable date for {}, skipping", path.display());
            result.skipped_entries += 1;
            continue;
        }

        debug!("Found {:?}: {} ({} bytes)", kind, path.display(), metadata.len());

        result.push(SourceFile {
            path: path.to_path_buf(),
            relative_path: path.strip_prefix(root).unwrap_or(path).to_path_buf(),
            extension: media::lowercase_extension(path).unwrap_or_default(),
            kind,
            size: metadata.len(),
            capture_date,
        });
    }

    result.date_groups = group_by_date(result.raw.iter().chain(result.jpeg.iter()), preview_samples);

    info!(
        "Scan complete: {} files ({} raw, {} jpeg, {} video, {} gopro, {} other), {} bytes, {} date groups, {} skipped",
        result.counts.total(),
        result.counts.raw,
        result.counts.jpeg,
        result.counts.video,
        result.counts.gopro,
        result.counts.other,
        result.total_size,
        result.date_groups.len(),
        result.skipped_entries
    );

    Ok(result)
}

/// Partition still images by capture date, ascending.
///
/// Undated files are not grouped; the scanner never produces undated stills.
pub fn group_by_date<'a>(files: impl Iterator<Item = &'a SourceFile>, samples: usize) -> Vec<DateGroup> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&SourceFile>> = BTreeMap::new();
    for file in files.filter(|f| f.kind.is_still()) {
        if let Some(date) = file.capture_date {
            by_date.entry(date).or_default().push(file);
        }
    }

    by_date
        .into_iter()
        .map(|(date, files)| {
            let (jpegs, raws): (Vec<&SourceFile>, Vec<&SourceFile>) =
                files.iter().partition(|f| f.kind == MediaKind::Jpeg);

            let picked = jpegs
                .iter()
                .chain(raws.iter())
                .take(samples)
                .map(|f| (*f).clone())
                .collect();

            DateGroup {
                date,
                samples: picked,
                total_count: files.len(),
                raw_count: raws.len(),
                jpeg_count: jpegs.len(),
            }
        })
        .collect()
}

/// Move plain videos whose container tags name a GoPro encoder into the
/// GoPro list. Probe failures leave the file where it is.
pub async fn flag_gopro_by_tags(result: &mut ScanResult, probe: &FFProbe) {
    let videos = std::mem::take(&mut result.video);
    let mut moved = 0usize;

    for mut file in videos {
        match probe.probe(&file.path).await {
            Ok(data) if data.is_gopro() => {
                debug!("Container tags mark {} as GoPro footage", file.path.display());
                file.kind = MediaKind::GoproVideo;
                result.counts.video -= 1;
                result.counts.gopro += 1;
                result.gopro.push(file);
                moved += 1;
            }
            Ok(_) => result.video.push(file),
            Err(e) => {
                debug!("ffprobe failed for {}: {}", file.path.display(), e);
                result.video.push(file);
            }
        }
    }

    if moved > 0 {
        info!("Flagged {} additional GoPro file(s) from container tags", moved);
    }
}
