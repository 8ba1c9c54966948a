//! Core data models for the media catalog

use chrono::{DateTime, Datelike, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::SystemTime;

/// Media kind classification
///
/// The four kind flags stored on a `FileRecord` are derived from this enum,
/// which keeps them mutually exclusive by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Image files (jpg, png, webp, etc.)
    Image,
    /// Video files (mp4, mkv, mov, etc.)
    Video,
    /// Audio files (mp3, flac, wav, etc.)
    Audio,
    /// Anything else, including unreadable and zero-byte entries
    Other,
}

impl MediaKind {
    /// Infer media kind from file extension
    pub fn from_extension(ext: &str) -> Self {
        let ext_lower = ext.to_lowercase();
        match ext_lower.as_str() {
            // Image extensions
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "tiff" | "tif" | "mpo" | "heic"
            | "heif" => MediaKind::Image,
            // Video extensions
            "mp4" | "mkv" | "avi" | "wmv" | "flv" | "mov" | "webm" | "m4v" | "ts" | "rmvb"
            | "3gp" => MediaKind::Video,
            // Audio extensions
            "mp3" | "flac" | "wav" | "aac" | "ogg" | "wma" | "m4a" => MediaKind::Audio,
            _ => MediaKind::Other,
        }
    }

    /// Infer media kind from a MIME type string
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            MediaKind::Image
        } else if mime.starts_with("video/") {
            MediaKind::Video
        } else if mime.starts_with("audio/") {
            MediaKind::Audio
        } else {
            MediaKind::Other
        }
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Other => "other",
        }
    }

    /// Whether this kind gets a cryptographic + perceptual hash pass
    pub fn is_hashable(&self) -> bool {
        matches!(self, MediaKind::Image | MediaKind::Video)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of classifying a filesystem entry without decoding it
#[derive(Debug, Clone)]
pub struct Classification {
    /// Final media kind (content sniff wins over extension on mismatch)
    pub kind: MediaKind,
    /// Detected or guessed MIME type
    pub mime_type: String,
    /// Whether the entry could be opened and stat'd
    pub readable: bool,
    /// Error text when the entry is unreadable or unusable
    pub error: Option<String>,
}

/// Per-file pipeline stage
///
/// `Discovered` is the initial state; `Persisted` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Discovered,
    Classified,
    Extracting,
    Hashing,
    Persisted,
    Failed,
}

impl Stage {
    /// Legal forward transitions of the per-file state machine
    pub fn can_transition_to(&self, next: Stage) -> bool {
        match (self, next) {
            // Any non-terminal stage may fail
            (Stage::Persisted, _) | (Stage::Failed, _) => false,
            (_, Stage::Failed) => true,
            (Stage::Discovered, Stage::Classified) => true,
            // Extraction only runs for image/video; audio/other skip to hashing-less persistence
            (Stage::Classified, Stage::Extracting) => true,
            (Stage::Classified, Stage::Persisted) => true,
            (Stage::Extracting, Stage::Hashing) => true,
            (Stage::Hashing, Stage::Persisted) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Discovered => "discovered",
            Stage::Classified => "classified",
            Stage::Extracting => "extracting",
            Stage::Hashing => "hashing",
            Stage::Persisted => "persisted",
            Stage::Failed => "failed",
        }
    }
}

/// One row of the `files` table: identity, timestamps, kind flags, status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Unique full path, stable identity across rescans
    pub full_path: String,
    /// File name with extension
    pub filename: String,
    /// File name without extension
    pub basename: String,
    /// Lowercase extension including the leading dot, empty when absent
    pub extension: String,
    /// Detected MIME type
    pub mime_type: Option<String>,
    /// File size in bytes
    pub size: u64,
    /// Canonical date (EXIF original > birth > modified), ISO-8601 seconds
    pub created_date: Option<String>,
    /// Filesystem modified date, ISO-8601 seconds
    pub modified_date: Option<String>,
    /// Filesystem birth date; mirrors created when the fs lacks birth time
    pub birth_date: Option<String>,
    /// Year derived from the canonical date
    pub year: Option<i32>,
    /// Month derived from the canonical date
    pub month: Option<u32>,
    /// Inode number where available
    pub inode: Option<u64>,
    pub is_image: bool,
    pub is_video: bool,
    pub is_audio: bool,
    /// Payload could not be decoded
    pub is_corrupted: bool,
    /// Error text for unreadable or failed files
    pub read_error: Option<String>,
    /// Successfully classified and not corrupted
    pub is_usable: bool,
}

impl FileRecord {
    /// Build a record from path pieces and filesystem metadata.
    ///
    /// Kind flags follow `classification.kind`; the canonical date starts as
    /// birth-or-modified and is re-derived once EXIF is known via
    /// [`FileRecord::apply_canonical_date`].
    pub fn new(path: &Path, size: u64, classification: &Classification) -> Self {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let basename = path
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default();

        let readable = classification.readable;
        Self {
            full_path: path.to_string_lossy().replace('\\', "/"),
            filename,
            basename,
            extension,
            mime_type: Some(classification.mime_type.clone()),
            size,
            created_date: None,
            modified_date: None,
            birth_date: None,
            year: None,
            month: None,
            inode: None,
            is_image: classification.kind == MediaKind::Image,
            is_video: classification.kind == MediaKind::Video,
            is_audio: classification.kind == MediaKind::Audio,
            is_corrupted: false,
            read_error: classification.error.clone(),
            is_usable: readable && classification.error.is_none(),
        }
    }

    /// The media kind implied by the flags
    pub fn kind(&self) -> MediaKind {
        if self.is_image {
            MediaKind::Image
        } else if self.is_video {
            MediaKind::Video
        } else if self.is_audio {
            MediaKind::Audio
        } else {
            MediaKind::Other
        }
    }

    /// Mark the record corrupted. Forces `is_usable` off.
    pub fn mark_corrupted(&mut self, error: impl Into<String>) {
        self.is_corrupted = true;
        self.is_usable = false;
        if self.read_error.is_none() {
            self.read_error = Some(error.into());
        }
    }

    /// Mark the record failed without the corruption flag (probe/persist errors)
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.is_usable = false;
        if self.read_error.is_none() {
            self.read_error = Some(error.into());
        }
    }

    /// Set the canonical date and derive year/month from it.
    ///
    /// Priority: EXIF original capture datetime > birth time > modified time.
    /// First available wins; deterministic across runs.
    pub fn apply_canonical_date(&mut self, exif_datetime: Option<&str>) {
        let canonical = exif_datetime
            .map(str::to_string)
            .or_else(|| self.birth_date.clone())
            .or_else(|| self.modified_date.clone());
        if let Some((year, month)) = canonical.as_deref().and_then(parse_year_month) {
            self.year = Some(year);
            self.month = Some(month);
        }
        self.created_date = canonical;
    }
}

/// One row of the `image_meta` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
    /// Grayscale mean pixel intensity on the 0-255 scale
    pub brightness_mean: Option<f64>,
    /// 16 raw pixel counts, bin width 16 over the 8-bit range
    pub hist_16bins: Option<Vec<u64>>,
    /// EXIF original capture datetime, ISO-8601 seconds
    pub exif_datetime_original: Option<String>,
    pub exif_camera_model: Option<String>,
    pub exif_lens: Option<String>,
    /// Raw EXIF orientation code 1-8, never applied to width/height
    pub exif_orientation: Option<u16>,
    pub exif_iso: Option<f64>,
    pub exif_fnumber: Option<f64>,
    pub exif_exposure_time: Option<f64>,
    pub exif_focal_length: Option<f64>,
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
}

/// One row of the `video_meta` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMeta {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Duration in seconds
    pub duration: Option<f64>,
    pub fps: Option<f64>,
    /// Container bitrate in bits per second
    pub bitrate: Option<u64>,
    pub nb_frames: Option<u64>,
    /// Always one of {0, 90, 180, 270}
    pub rotation: Option<u32>,
    pub video_codec: Option<String>,
    /// None when the container carries no audio stream
    pub audio_codec: Option<String>,
}

/// One row of the `hash_meta` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HashMeta {
    /// SHA-256 over the raw file bytes, lowercase hex
    pub sha256: String,
    /// Average hash, 16 hex chars; None when perceptual hashing failed
    pub ahash: Option<String>,
    /// Difference hash
    pub dhash: Option<String>,
    /// DCT perceptual hash
    pub phash: Option<String>,
    /// Haar wavelet hash
    pub whash: Option<String>,
}

/// Fully-resolved extraction result for one path, handed to the catalog writer
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub record: FileRecord,
    pub image: Option<ImageMeta>,
    pub video: Option<VideoMeta>,
    pub hashes: Option<HashMeta>,
    /// Terminal stage reached by the pipeline (Persisted is set by the writer)
    pub stage: Stage,
    /// Category of the first error that degraded this file, if any
    pub error_kind: Option<crate::error::IndexErrorKind>,
}

impl ProcessedFile {
    pub fn new(record: FileRecord) -> Self {
        Self {
            record,
            image: None,
            video: None,
            hashes: None,
            stage: Stage::Classified,
            error_kind: None,
        }
    }
}

/// Aggregated result of a scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    /// Total files discovered by the walk
    pub total_files: u64,
    /// Total directories traversed
    pub total_dirs: u64,
    pub image_count: u64,
    pub video_count: u64,
    pub audio_count: u64,
    /// Files committed to the catalog
    pub persisted: u64,
    /// Files recorded with a failure status
    pub failed: u64,
    /// Whether the scan was cancelled before completing
    pub cancelled: bool,
    /// Total scan duration in milliseconds
    pub duration_ms: u64,
}

/// Convert a filesystem timestamp to an ISO-8601 string with seconds precision
pub fn iso_from_system_time(t: SystemTime) -> String {
    let dt: DateTime<Local> = t.into();
    dt.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Parse year/month out of an ISO-8601 datetime string
pub fn parse_year_month(iso: &str) -> Option<(i32, u32)> {
    let dt = NaiveDateTime::parse_from_str(iso, "%Y-%m-%dT%H:%M:%S").ok()?;
    Some((dt.year(), dt.month()))
}
