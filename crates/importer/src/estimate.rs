use std::path::{Path, PathBuf};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sysinfo::Disks;
use crate::preset::ConversionPreset;
use crate::scan::ScanResult;

/// Projected destination usage against free space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeEstimate {
    pub estimated_bytes: u64,
    /// None when the destination disk could not be determined
    pub free_bytes: Option<u64>,
    pub sufficient: bool,
}

impl SizeEstimate {
    pub fn new(estimated_bytes: u64, free_bytes: Option<u64>) -> Self {
        Self {
            estimated_bytes,
            free_bytes,
            sufficient: free_bytes.map(|free| estimated_bytes <= free).unwrap_or(true),
        }
    }
}

/// Projected size from raw totals: converted bytes scaled, the rest copied as is
pub fn project_bytes(total_bytes: u64, converted_bytes: u64, multiplier: f64) -> u64 {
    let passthrough = total_bytes.saturating_sub(converted_bytes);
    let converted = (converted_bytes as f64 * multiplier).round() as u64;
    passthrough + converted
}

/// Destination bytes for importing `scan` with `preset_name`.
/// Unknown presets count as a plain copy.
pub fn estimate_bytes(scan: &ScanResult, preset_name: &str) -> u64 {
    let multiplier = ConversionPreset::from_name(preset_name)
        .map(|p| p.size_multiplier())
        .unwrap_or(1.0);
    project_bytes(scan.total_size, scan.gopro_size(), multiplier)
}

/// Available bytes on the disk that holds `path` (or its nearest existing ancestor)
pub fn free_space(path: &Path) -> Option<u64> {
    let existing = nearest_existing(path)?;
    let target = existing.canonicalize().unwrap_or(existing);

    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .iter()
        .filter(|d| target.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len());

    match disk {
        Some(d) => {
            debug!("Free space for {}: {} bytes on {}", target.display(), d.available_space(), d.mount_point().display());
            Some(d.available_space())
        }
        None => {
            warn!("No mounted disk found for {}", target.display());
            None
        }
    }
}

fn nearest_existing(path: &Path) -> Option<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    absolute.ancestors().find(|p| p.exists()).map(Path::to_path_buf)
}
