use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use anyhow::{Context, Result};
use exif::{In, Reader, Tag};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::RwLock;
use crate::media::MediaKind;

const JPEG_QUALITY: u8 = 80;

/// Rendered preview bytes (always JPEG)
#[derive(Debug, Clone)]
pub struct Preview {
    pub bytes: Arc<Vec<u8>>,
    /// True when the source could not be decoded
    pub placeholder: bool,
}

/// Reference to one date-group sample for the caller to fetch later
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewHandle {
    pub path: PathBuf,
    pub file_name: String,
    pub kind: MediaKind,
    pub placeholder: bool,
}

struct CachedPreview {
    modified: Option<SystemTime>,
    preview: Preview,
}

/// Per-path cache of rendered previews for a date-preview session.
///
/// `clear` is best-effort: a render already in flight may insert its entry
/// after the clear returns.
pub struct PreviewCache {
    entries: RwLock<HashMap<PathBuf, CachedPreview>>,
    edge: u32,
}

impl PreviewCache {
    pub fn new(edge: u32) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            edge,
        }
    }

    /// Cached preview for `path`, rendering it on a miss or when the
    /// source changed since it was cached
    pub async fn get_or_render(&self, path: &Path) -> Preview {
        let modified = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|m| m.modified().ok());

        {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(path) {
                if cached.modified == modified {
                    return cached.preview.clone();
                }
            }
        }

        let edge = self.edge;
        let owned = path.to_path_buf();
        let rendered = tokio::task::spawn_blocking(move || render_preview(&owned, edge)).await;

        let preview = match rendered {
            Ok(Ok(bytes)) => Preview {
                bytes: Arc::new(bytes),
                placeholder: false,
            },
            Ok(Err(e)) => {
                warn!("Preview render failed for {}: {:#}", path.display(), e);
                placeholder_preview(edge)
            }
            Err(e) => {
                warn!("Preview task failed for {}: {}", path.display(), e);
                placeholder_preview(edge)
            }
        };

        self.entries.write().await.insert(
            path.to_path_buf(),
            CachedPreview {
                modified,
                preview: preview.clone(),
            },
        );
        preview
    }

    /// Drop every cached preview, returning how many were held
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        info!("Cleared preview cache ({} entries)", count);
        count
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Decode and shrink one image into a bounded JPEG.
///
/// Raw files go through their embedded EXIF thumbnail first.
pub fn render_preview(path: &Path, edge: u32) -> Result<Vec<u8>> {
    let image = if MediaKind::classify(path) == MediaKind::Raw {
        match embedded_thumbnail(path) {
            Some(bytes) => image::load_from_memory(&bytes)
                .with_context(|| format!("Failed to decode embedded thumbnail: {}", path.display()))?,
            None => decode_file(path)?,
        }
    } else {
        decode_file(path)?
    };

    encode_jpeg(&image.thumbnail(edge, edge))
}

fn decode_file(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .with_context(|| format!("Failed to open image: {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("Failed to detect image format: {}", path.display()))?
        .decode()
        .with_context(|| format!("Failed to decode image: {}", path.display()))
}

/// JPEG thumbnail stored in IFD1 of the EXIF block
fn embedded_thumbnail(path: &Path) -> Option<Vec<u8>> {
    let file = File::open(path).ok()?;
    let exif = Reader::new()
        .read_from_container(&mut BufReader::new(file))
        .ok()?;

    let offset = exif
        .get_field(Tag::JPEGInterchangeFormat, In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;
    let len = exif
        .get_field(Tag::JPEGInterchangeFormatLength, In::THUMBNAIL)?
        .value
        .get_uint(0)? as usize;

    debug!("Embedded thumbnail in {}: {} bytes at {}", path.display(), len, offset);
    exif.buf().get(offset..offset.checked_add(len)?).map(|b| b.to_vec())
}

fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(&rgb)
        .context("Failed to encode preview JPEG")?;
    Ok(buf)
}

/// Neutral grey 3:2 tile used when a sample cannot be rendered
fn placeholder_preview(edge: u32) -> Preview {
    let tile = RgbImage::from_pixel(edge.max(1), (edge * 2 / 3).max(1), Rgb([64, 64, 64]));
    let bytes = encode_jpeg(&DynamicImage::ImageRgb8(tile)).unwrap_or_default();
    Preview {
        bytes: Arc::new(bytes),
        placeholder: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, w: u32, h: u32) {
        RgbImage::from_pixel(w, h, Rgb([200, 10, 10])).save(path).unwrap();
    }

    #[test]
    fn test_render_bounds_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        write_png(&path, 1200, 800);

        let bytes = render_preview(&path, 300).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (300, 200));
    }

    #[tokio::test]
    async fn test_broken_file_gets_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.cr2");
        std::fs::write(&path, b"definitely not a raw file").unwrap();

        let cache = PreviewCache::new(120);
        let preview = cache.get_or_render(&path).await;
        assert!(preview.placeholder);
        assert!(!preview.bytes.is_empty());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        write_png(&path, 64, 64);

        let cache = PreviewCache::new(32);
        let first = cache.get_or_render(&path).await;
        let second = cache.get_or_render(&path).await;
        assert!(!first.placeholder);
        assert!(Arc::ptr_eq(&first.bytes, &second.bytes));

        assert_eq!(cache.clear().await, 1);
        assert!(cache.is_empty().await);

        let third = cache.get_or_render(&path).await;
        assert!(!Arc::ptr_eq(&first.bytes, &third.bytes));
    }
}
