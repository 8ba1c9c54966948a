//! Photo and video indexing pipeline
//!
//! Walks directory trees, classifies entries by content, extracts EXIF and
//! container metadata, computes cryptographic and perceptual hashes, and
//! persists everything transactionally into a SQLite catalog. Rescans are
//! idempotent: the full path is the stable identity of a file.

pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod hashes;
pub mod image_meta;
pub mod models;
pub mod progress;
pub mod scanner;
pub mod video_meta;

pub use config::ScanConfig;
pub use db::Catalog;
pub use error::{IndexError, IndexErrorKind};
pub use models::{
    Classification, FileRecord, HashMeta, ImageMeta, MediaKind, ProcessedFile, ScanSummary, Stage,
    VideoMeta,
};
pub use progress::ProgressReporter;
pub use scanner::{CancelToken, Scanner};
pub use video_meta::{FfprobeProbe, VideoProbe};
