use std::path::Path;
use serde::{Deserialize, Serialize};

/// Raw camera formats
pub const RAW_EXTENSIONS: &[&str] = &["arw", "cr2", "cr3", "nef", "orf", "raf", "rw2", "dng", "raw"];
/// Still images that are not raw
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"];
/// Video containers
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "mts", "m2ts"];

/// Classified type of a scanned file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Raw,
    Jpeg,
    Video,
    GoproVideo,
    Other,
}

impl MediaKind {
    /// Classify by extension alone (GoPro detection needs the full path)
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_lowercase();
        if RAW_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Raw
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Jpeg
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else {
            MediaKind::Other
        }
    }

    /// Classify a path, flagging GoPro footage among videos
    pub fn classify(path: &Path) -> Self {
        let ext = lowercase_extension(path).unwrap_or_default();
        match Self::from_extension(&ext) {
            MediaKind::Video if is_gopro_path(path) => MediaKind::GoproVideo,
            kind => kind,
        }
    }

    /// Files that take part in date grouping
    pub fn is_still(&self) -> bool {
        matches!(self, MediaKind::Raw | MediaKind::Jpeg)
    }

    /// Project sub-folder the file is organized into
    pub fn project_subdir(&self) -> &'static str {
        match self {
            MediaKind::Raw => "RAW",
            MediaKind::Jpeg => "JPEG",
            MediaKind::Video | MediaKind::GoproVideo => "Video",
            MediaKind::Other => "Other",
        }
    }
}

/// Sub-folders created in every project
pub const PROJECT_SUBDIRS: &[&str] = &["RAW", "JPEG", "Video", "Other"];

/// Lowercased extension without the dot
pub fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

/// GoPro naming (GH010001.MP4, GX010001.MP4, GP010001.MP4, GOPR0001.MP4)
/// or a camera folder such as DCIM/100GOPRO
pub fn is_gopro_path(path: &Path) -> bool {
    let name_matches = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(is_gopro_file_name)
        .unwrap_or(false);

    let folder_matches = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .map(is_gopro_folder_name)
        .unwrap_or(false);

    name_matches || folder_matches
}

fn is_gopro_file_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    let Some(stem) = upper.strip_suffix(".MP4") else {
        return false;
    };

    ["GH", "GX", "GP"].iter().any(|prefix| {
        stem.strip_prefix(prefix)
            .map(|rest| is_digits(rest, 6))
            .unwrap_or(false)
    }) || stem.strip_prefix("GOPR").map(|rest| is_digits(rest, 4)).unwrap_or(false)
}

fn is_gopro_folder_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    upper
        .strip_suffix("GOPRO")
        .map(|rest| is_digits(rest, 3))
        .unwrap_or(false)
}

fn is_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    #[test]
    fn test_extension_classification() {
        assert_eq!(MediaKind::classify(Path::new("/a/IMG_0001.CR2")), MediaKind::Raw);
        assert_eq!(MediaKind::classify(Path::new("/a/IMG_0001.jpg")), MediaKind::Jpeg);
        assert_eq!(MediaKind::classify(Path::new("/a/scan.TIFF")), MediaKind::Jpeg);
        assert_eq!(MediaKind::classify(Path::new("/a/clip.mov")), MediaKind::Video);
        assert_eq!(MediaKind::classify(Path::new("/a/notes.txt")), MediaKind::Other);
        assert_eq!(MediaKind::classify(Path::new("/a/Makefile")), MediaKind::Other);
    }

    #[test]
    fn test_gopro_file_names() {
        for name in ["GH010001.MP4", "gx020315.mp4", "GP010001.MP4", "GOPR0042.MP4"] {
            assert_eq!(
                MediaKind::classify(&PathBuf::from("/card").join(name)),
                MediaKind::GoproVideo,
                "{name} should be flagged"
            );
        }
        for name in ["GH01001.MP4", "GOPR0042.MOV", "DJI_0001.MP4", "GH010001X.MP4"] {
            assert_eq!(
                MediaKind::classify(&PathBuf::from("/card").join(name)),
                MediaKind::Video,
                "{name} should not be flagged"
            );
        }
    }

    #[test]
    fn test_gopro_folder_convention() {
        let path = Path::new("/media/card/DCIM/100GOPRO/clip.mp4");
        assert_eq!(MediaKind::classify(path), MediaKind::GoproVideo);

        // folder convention only applies to videos
        let photo = Path::new("/media/card/DCIM/100GOPRO/G0010001.JPG");
        assert_eq!(MediaKind::classify(photo), MediaKind::Jpeg);
    }

    proptest! {
        #[test]
        fn test_classification_ignores_case(
            ext in prop::sample::select(vec!["arw", "jpg", "mp4", "nef", "webp", "m2ts", "xyz"]),
            upper in prop::bool::ANY,
        ) {
            let e = if upper { ext.to_uppercase() } else { ext.to_string() };
            let path = PathBuf::from(format!("/x/file.{}", e));
            prop_assert_eq!(MediaKind::classify(&path), MediaKind::from_extension(ext));
        }
    }
}
