//! Image metadata extraction: dimensions, brightness, histogram, EXIF
//!
//! Dimensions reflect the stored pixel grid; the EXIF orientation code is
//! recorded raw (1-8) and never applied. EXIF fields are parsed tolerantly:
//! an absent tag is `None`, a malformed tag is `None` plus a warning, and
//! neither aborts the extraction.

use chrono::NaiveDateTime;
use image::DynamicImage;
use log::warn;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::IndexError;
use crate::models::ImageMeta;

/// Decode an image and extract its catalog metadata.
///
/// Returns the decoded bitmap alongside the metadata so the hashing stage
/// can reuse it without a second decode. A decode failure is a
/// `DecodeError`; the caller marks the file corrupted.
pub fn extract(path: &Path) -> Result<(ImageMeta, DynamicImage), IndexError> {
    let reader = image::ImageReader::open(path)
        .map_err(|e| IndexError::from(e).with_path(path.into()))?
        .with_guessed_format()
        .map_err(|e| IndexError::from(e).with_path(path.into()))?;
    let bitmap = reader
        .decode()
        .map_err(|e| IndexError::decode_error(path.into(), e.to_string()))?;

    let mut meta = ImageMeta {
        width: bitmap.width(),
        height: bitmap.height(),
        ..Default::default()
    };

    let (brightness, hist) = brightness_stats(&bitmap);
    meta.brightness_mean = Some(brightness);
    meta.hist_16bins = Some(hist);

    read_exif_fields(path, &mut meta);

    Ok((meta, bitmap))
}

/// Grayscale mean intensity (0-255) and 16-bin raw-count histogram
fn brightness_stats(img: &DynamicImage) -> (f64, Vec<u64>) {
    let gray = img.to_luma8();
    let mut hist = vec![0u64; 16];
    let mut sum: u64 = 0;
    let mut count: u64 = 0;
    for pixel in gray.pixels() {
        let v = pixel.0[0];
        sum += u64::from(v);
        hist[usize::from(v >> 4)] += 1;
        count += 1;
    }
    let mean = if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    };
    (mean, hist)
}

/// Populate EXIF fields in-place. Missing or unreadable EXIF leaves every
/// field `None`; it is not an extraction failure.
fn read_exif_fields(path: &Path, meta: &mut ImageMeta) {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return,
    };
    let mut reader = BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(e) => e,
        Err(_) => return,
    };

    let raw_datetime =
        ascii_field(&exif, exif::Tag::DateTimeOriginal).or_else(|| ascii_field(&exif, exif::Tag::DateTime));
    if let Some(raw) = raw_datetime {
        meta.exif_datetime_original = exif_datetime_to_iso(&raw);
        if meta.exif_datetime_original.is_none() {
            warn!(
                "malformed EXIF datetime {:?} in {}",
                raw,
                path.display()
            );
        }
    }

    meta.exif_camera_model = ascii_field(&exif, exif::Tag::Model);
    meta.exif_lens = ascii_field(&exif, exif::Tag::LensModel);

    meta.exif_orientation = exif
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .and_then(|v| match v {
            1..=8 => Some(v as u16),
            _ => {
                warn!("EXIF orientation {} out of range in {}", v, path.display());
                None
            }
        });

    meta.exif_iso = numeric_field(&exif, exif::Tag::PhotographicSensitivity);
    meta.exif_fnumber = numeric_field(&exif, exif::Tag::FNumber);
    meta.exif_exposure_time = numeric_field(&exif, exif::Tag::ExposureTime);
    meta.exif_focal_length = numeric_field(&exif, exif::Tag::FocalLength);

    let (lat, lon) = gps_coordinates(&exif);
    meta.gps_lat = lat;
    meta.gps_lon = lon;
}

/// EXIF "YYYY:MM:DD HH:MM:SS" to ISO-8601 with seconds precision
pub(crate) fn exif_datetime_to_iso(raw: &str) -> Option<String> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
}

fn ascii_field(exif: &exif::Exif, tag: exif::Tag) -> Option<String> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    match &field.value {
        exif::Value::Ascii(groups) => groups.first().map(|bytes| {
            String::from_utf8_lossy(bytes)
                .trim_matches(char::from(0))
                .trim()
                .to_string()
        }),
        _ => None,
    }
    .filter(|s| !s.is_empty())
}

fn numeric_field(exif: &exif::Exif, tag: exif::Tag) -> Option<f64> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    rational_at(&field.value, 0)
}

fn rational_at(value: &exif::Value, index: usize) -> Option<f64> {
    match value {
        exif::Value::Rational(v) => v.get(index).map(|r| r.to_f64()),
        exif::Value::SRational(v) => v.get(index).map(|r| r.to_f64()),
        _ => value.get_uint(index).map(f64::from),
    }
}

/// GPS degrees/minutes/seconds with hemisphere refs, as signed decimal degrees
fn gps_coordinates(exif: &exif::Exif) -> (Option<f64>, Option<f64>) {
    let lat = dms_field(exif, exif::Tag::GPSLatitude);
    let lat_ref = ascii_field(exif, exif::Tag::GPSLatitudeRef);
    let lon = dms_field(exif, exif::Tag::GPSLongitude);
    let lon_ref = ascii_field(exif, exif::Tag::GPSLongitudeRef);

    let (Some(mut lat), Some(lat_ref), Some(mut lon), Some(lon_ref)) = (lat, lat_ref, lon, lon_ref)
    else {
        return (None, None);
    };

    if lat_ref.eq_ignore_ascii_case("S") {
        lat = -lat;
    }
    if lon_ref.eq_ignore_ascii_case("W") {
        lon = -lon;
    }
    (Some(lat), Some(lon))
}

fn dms_field(exif: &exif::Exif, tag: exif::Tag) -> Option<f64> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    let d = rational_at(&field.value, 0)?;
    let m = rational_at(&field.value, 1)?;
    let s = rational_at(&field.value, 2)?;
    Some(d + m / 60.0 + s / 3600.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexErrorKind as Kind;
    use image::{Rgb, RgbImage};
    use std::io::Write;
    use tempfile::TempDir;

    fn save_png(dir: &TempDir, name: &str, img: &RgbImage) -> std::path::PathBuf {
        let path = dir.path().join(name);
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_extract_dimensions_and_brightness() {
        let dir = TempDir::new().unwrap();
        let img = RgbImage::from_pixel(40, 30, Rgb([100, 100, 100]));
        let path = save_png(&dir, "gray.png", &img);

        let (meta, bitmap) = extract(&path).unwrap();
        assert_eq!(meta.width, 40);
        assert_eq!(meta.height, 30);
        assert_eq!(bitmap.width(), 40);

        // Equal RGB channels convert to the same luma value
        let brightness = meta.brightness_mean.unwrap();
        assert!((brightness - 100.0).abs() < 1.0, "brightness {brightness}");

        let hist = meta.hist_16bins.unwrap();
        assert_eq!(hist.len(), 16);
        assert_eq!(hist.iter().sum::<u64>(), 40 * 30);
        // All mass in the bin holding value ~100
        assert_eq!(hist[100 >> 4], 40 * 30);
    }

    #[test]
    fn test_extract_without_exif_leaves_fields_none() {
        let dir = TempDir::new().unwrap();
        let img = RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]));
        let path = save_png(&dir, "plain.png", &img);

        let (meta, _) = extract(&path).unwrap();
        assert!(meta.exif_datetime_original.is_none());
        assert!(meta.exif_camera_model.is_none());
        assert!(meta.exif_orientation.is_none());
        assert!(meta.gps_lat.is_none());
    }

    #[test]
    fn test_truncated_image_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.jpg");
        let mut f = std::fs::File::create(&path).unwrap();
        // JPEG SOI marker followed by garbage
        f.write_all(&[0xff, 0xd8, 0xff, 0xe0, 0x00, 0x01, 0x02]).unwrap();
        drop(f);

        let err = extract(&path).unwrap_err();
        assert_eq!(err.kind, Kind::DecodeError);
    }

    #[test]
    fn test_missing_image_is_read_failure() {
        let err = extract(Path::new("/nonexistent/a.png")).unwrap_err();
        assert!(err.is_read_failure());
    }

    #[test]
    fn test_exif_datetime_to_iso() {
        assert_eq!(
            exif_datetime_to_iso("2019:01:15 08:30:00").as_deref(),
            Some("2019-01-15T08:30:00")
        );
        assert_eq!(exif_datetime_to_iso("not a date"), None);
        assert_eq!(exif_datetime_to_iso("2019:13:45 99:00:00"), None);
    }
}
