use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::SystemTime;
use chrono::{DateTime, Local, NaiveDate};
use exif::{In, Reader, Tag, Value};
use log::debug;

/// Calendar date a file was captured on.
///
/// Still images use EXIF `DateTimeOriginal` (then `DateTime`); anything else,
/// or an image without usable EXIF, falls back to the modification time in
/// local time. `None` only when even the file metadata is unreadable.
pub fn capture_date(path: &Path, read_exif: bool, modified: Option<SystemTime>) -> Option<NaiveDate> {
    if read_exif {
        if let Some(date) = exif_date(path) {
            return Some(date);
        }
    }

    let modified = match modified {
        Some(m) => m,
        None => std::fs::metadata(path).and_then(|m| m.modified()).ok()?,
    };
    Some(DateTime::<Local>::from(modified).date_naive())
}

/// EXIF capture date, if the container carries one
pub fn exif_date(path: &Path) -> Option<NaiveDate> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = match Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(e) => {
            debug!("No EXIF in {}: {}", path.display(), e);
            return None;
        }
    };

    let field = exif
        .get_field(Tag::DateTimeOriginal, In::PRIMARY)
        .or_else(|| exif.get_field(Tag::DateTime, In::PRIMARY))?;

    match field.value {
        Value::Ascii(ref parts) if !parts.is_empty() => {
            let dt = exif::DateTime::from_ascii(&parts[0]).ok()?;
            NaiveDate::from_ymd_opt(dt.year as i32, dt.month as u32, dt.day as u32)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_falls_back_to_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.jpg");
        std::fs::write(&path, b"not really a jpeg").unwrap();

        let noon = Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let file = File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::from(noon)).unwrap();

        assert_eq!(
            capture_date(&path, true, None),
            NaiveDate::from_ymd_opt(2024, 5, 1)
        );
    }

    #[test]
    fn test_missing_file_has_no_date() {
        assert_eq!(capture_date(Path::new("/nonexistent/a.jpg"), true, None), None);
    }
}
