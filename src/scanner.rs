//! Scan orchestration: traversal, per-file staging, worker pool, persistence
//!
//! The directory walk is a single-threaded producer; classification,
//! extraction and hashing run on a bounded rayon pool; results flow over a
//! channel to one writer thread that owns the catalog connection. Workers
//! share nothing but the work list, the cancel token and atomic counters.

use crossbeam_channel::{bounded, Receiver};
use log::{debug, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

use crate::classify;
use crate::config::ScanConfig;
use crate::db::Catalog;
use crate::error::{IndexError, IndexErrorKind};
use crate::hashes;
use crate::image_meta;
use crate::models::{
    iso_from_system_time, FileRecord, HashMeta, MediaKind, ProcessedFile, ScanSummary, Stage,
};
use crate::progress::ProgressReporter;
use crate::video_meta::{self, FfprobeProbe, VideoProbe};

/// Progress message cadence
const PROGRESS_INTERVAL_MS: u64 = 500;

/// Cooperative cancellation signal shared by the walker, workers and probes
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation: no new files are dispatched, outstanding probe
    /// subprocesses are killed, in-flight transactions still commit or roll
    /// back whole.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives a full scan: walk, classify, extract, hash, persist
pub struct Scanner {
    config: ScanConfig,
    probe: Arc<dyn VideoProbe>,
    cancel: CancelToken,
}

impl Scanner {
    /// Scanner using the real ffprobe/ffmpeg binaries
    pub fn new(config: ScanConfig) -> Self {
        let cancel = CancelToken::new();
        let probe = Arc::new(FfprobeProbe::new(config.probe_timeout(), cancel.clone()));
        Self {
            config,
            probe,
            cancel,
        }
    }

    /// Scanner with a custom probe (used by tests)
    pub fn with_probe(config: ScanConfig, probe: Arc<dyn VideoProbe>) -> Self {
        Self {
            config,
            probe,
            cancel: CancelToken::new(),
        }
    }

    /// Token that cancels this scan when triggered
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the scan to completion (or cancellation).
    ///
    /// Fails fatally only when no root is accessible or the catalog cannot
    /// be opened; every per-file problem is recorded in the catalog instead.
    pub fn run(&self) -> Result<ScanSummary, IndexError> {
        let start = Instant::now();

        if self.config.roots.is_empty() {
            return Err(IndexError::io_error(None, "no scan roots configured"));
        }
        for root in &self.config.roots {
            if !root.exists() {
                return Err(IndexError::not_found(root.clone()));
            }
        }

        let catalog = match &self.config.db_path {
            Some(path) => Catalog::open(path)?,
            None => Catalog::open_memory()?,
        };

        let reporter = Arc::new(ProgressReporter::new(
            self.config.show_progress,
            PROGRESS_INTERVAL_MS,
        ));
        reporter.start(
            &self
                .config
                .roots
                .iter()
                .map(|r| r.to_string_lossy().to_string())
                .collect::<Vec<_>>(),
            self.config.recursive,
        );

        // Discovery: single-threaded walk
        let (paths, total_dirs) = self.discover();
        let total_files = paths.len() as u64;

        let threads = self.config.effective_threads();
        let (tx, rx) = bounded::<ProcessedFile>(threads * 4);

        let retries = self.config.persist_retries;
        let writer_reporter = Arc::clone(&reporter);
        let writer = std::thread::spawn(move || writer_loop(catalog, rx, retries, writer_reporter));

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| IndexError::io_error(None, e.to_string()))?;

        let cancel = self.cancel.clone();
        let probe = Arc::clone(&self.probe);
        pool.install(|| {
            paths.par_iter().for_each(|path| {
                if cancel.is_cancelled() {
                    return;
                }
                let file = process_file(path, probe.as_ref());
                if tx.send(file).is_err() {
                    warn!("catalog writer gone, dropping {}", path.display());
                }
            });
        });
        drop(tx);

        let totals = writer
            .join()
            .map_err(|_| IndexError::persistence_error("catalog writer thread panicked"))?;

        let summary = ScanSummary {
            total_files,
            total_dirs,
            image_count: totals.images,
            video_count: totals.videos,
            audio_count: totals.audios,
            persisted: totals.persisted,
            failed: totals.failed,
            cancelled: self.cancel.is_cancelled(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        reporter.done(&summary);
        Ok(summary)
    }

    /// Walk the roots, collecting file (and symlink) paths and a dir count
    fn discover(&self) -> (Vec<PathBuf>, u64) {
        let mut paths = Vec::new();
        let mut total_dirs = 0u64;
        let db_path = self.config.db_path.as_deref();

        for root in &self.config.roots {
            let config = &self.config;
            let walker = WalkDir::new(root)
                .max_depth(config.effective_max_depth())
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| {
                    if entry.depth() == 0 || !entry.file_type().is_dir() {
                        return true;
                    }
                    entry
                        .file_name()
                        .to_str()
                        .map(|name| !config.should_ignore_dir(name))
                        .unwrap_or(true)
                });

            for entry in walker {
                if self.cancel.is_cancelled() {
                    break;
                }
                match entry {
                    Ok(entry) => {
                        if entry.file_type().is_dir() {
                            total_dirs += 1;
                        } else if entry.file_type().is_file() || entry.path_is_symlink() {
                            // The catalog may live inside a scanned root;
                            // it must not index itself.
                            if is_catalog_file(entry.path(), db_path) {
                                continue;
                            }
                            // Broken symlinks are kept: they become Failed
                            // records, so the catalog reflects every path.
                            paths.push(entry.into_path());
                        }
                    }
                    Err(e) => {
                        warn!("walk error: {}", e);
                    }
                }
            }
        }
        (paths, total_dirs)
    }
}

/// True for the catalog database itself and its SQLite sidecar files
/// (`-journal`, `-wal`, `-shm`)
fn is_catalog_file(path: &Path, db_path: Option<&Path>) -> bool {
    let Some(db) = db_path else {
        return false;
    };
    if path == db {
        return true;
    }
    match (path.to_str(), db.to_str()) {
        (Some(p), Some(d)) => p.len() > d.len() && p.starts_with(d) && p.as_bytes()[d.len()] == b'-',
        _ => false,
    }
}

/// Counter totals returned by the writer thread
struct WriterTotals {
    persisted: u64,
    failed: u64,
    images: u64,
    videos: u64,
    audios: u64,
}

fn writer_loop(
    mut catalog: Catalog,
    rx: Receiver<ProcessedFile>,
    retries: u32,
    reporter: Arc<ProgressReporter>,
) -> WriterTotals {
    let mut totals = WriterTotals {
        persisted: 0,
        failed: 0,
        images: 0,
        videos: 0,
        audios: 0,
    };
    let mut processed = 0u64;

    for mut file in rx.iter() {
        processed += 1;
        match file.record.kind() {
            MediaKind::Image => totals.images += 1,
            MediaKind::Video => totals.videos += 1,
            MediaKind::Audio => totals.audios += 1,
            MediaKind::Other => {}
        }

        match catalog.persist_with_retry(&mut file, retries) {
            Ok(_) => {
                // Failed is terminal; only usable files advance to Persisted
                if file.record.is_usable {
                    file.stage = Stage::Persisted;
                    totals.persisted += 1;
                } else {
                    totals.failed += 1;
                }
            }
            Err(e) => {
                totals.failed += 1;
                reporter.error("persistence", &e.message, Some(&file.record.full_path));
            }
        }

        if !file.record.is_usable {
            if let Some(message) = &file.record.read_error {
                let error_type = file
                    .error_kind
                    .map(|k| k.as_str())
                    .unwrap_or("io");
                reporter.error(error_type, message, Some(&file.record.full_path));
            }
        }

        if reporter.should_report() {
            reporter.progress(
                processed,
                totals.images,
                totals.videos,
                totals.audios,
                &file.record.full_path,
            );
        }
    }
    totals
}

/// Run one file through classify -> extract -> hash.
///
/// Stages are strictly sequential; any stage error degrades the file to a
/// Failed record instead of propagating. Persistence happens on the writer
/// thread afterwards.
fn process_file(path: &Path, probe: &dyn VideoProbe) -> ProcessedFile {
    let classification = classify::classify(path);
    let metadata = std::fs::metadata(path).ok();
    let size = metadata.as_ref().map(|m| m.len()).unwrap_or(0);

    let mut record = FileRecord::new(path, size, &classification);
    if let Some(meta) = &metadata {
        record.modified_date = meta.modified().ok().map(iso_from_system_time);
        record.birth_date = meta.created().ok().map(iso_from_system_time);
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            record.inode = Some(meta.ino());
        }
    }
    let mut file = ProcessedFile::new(record);

    if !classification.readable {
        file.error_kind = Some(IndexErrorKind::IoError);
        file.record.apply_canonical_date(None);
        file.stage = Stage::Failed;
        return file;
    }

    let mut exif_datetime = None;
    match classification.kind {
        MediaKind::Image => {
            file.stage = Stage::Extracting;
            let bitmap = match image_meta::extract(path) {
                Ok((meta, bitmap)) => {
                    exif_datetime = meta.exif_datetime_original.clone();
                    file.image = Some(meta);
                    Some(bitmap)
                }
                Err(e) => {
                    if e.kind == IndexErrorKind::DecodeError {
                        file.record.mark_corrupted(&e.message);
                    } else {
                        file.record.mark_failed(&e.message);
                    }
                    file.error_kind = Some(e.kind);
                    None
                }
            };
            file.stage = Stage::Hashing;
            build_hashes(path, bitmap.as_ref(), &mut file);
        }
        MediaKind::Video => {
            file.stage = Stage::Extracting;
            match video_meta::extract(path, probe) {
                Ok(meta) => file.video = Some(meta),
                Err(e) => {
                    file.record.mark_failed(&e.message);
                    file.error_kind = Some(e.kind);
                }
            }
            // Hashing still runs: the raw bytes are readable even when the
            // probe failed, and the frame grab is independent of it.
            file.stage = Stage::Hashing;
            let frame = probe
                .grab_frame(path)
                .ok()
                .and_then(|bytes| image::load_from_memory(&bytes).ok());
            if frame.is_none() {
                debug!("no representative frame for {}", path.display());
            }
            build_hashes(path, frame.as_ref(), &mut file);
        }
        MediaKind::Audio | MediaKind::Other => {
            // No extractor and no hashing pass; minimal persistence only
        }
    }

    file.record.apply_canonical_date(exif_datetime.as_deref());
    if !file.record.is_usable {
        file.stage = Stage::Failed;
    }
    file
}

/// Attach the content digest plus whatever perceptual hashes the bitmap
/// yields. SHA-256 failure (file vanished mid-scan) degrades the record.
fn build_hashes(path: &Path, bitmap: Option<&image::DynamicImage>, file: &mut ProcessedFile) {
    match hashes::sha256_file(path) {
        Ok(sha256) => {
            let perceptual = bitmap.map(hashes::perceptual_hashes).unwrap_or_default();
            file.hashes = Some(HashMeta {
                sha256,
                ahash: perceptual.ahash,
                dhash: perceptual.dhash,
                phash: perceptual.phash,
                whash: perceptual.whash,
            });
        }
        Err(e) => {
            file.record.mark_failed(&e.message);
            if file.error_kind.is_none() {
                file.error_kind = Some(e.kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Classification, VideoMeta};
    use image::{Rgb, RgbImage};
    use serde_json::json;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Probe fake: canned ffprobe document and an in-memory PNG frame
    struct FakeProbe {
        probe_json: Option<serde_json::Value>,
        frame: Option<Vec<u8>>,
    }

    impl FakeProbe {
        fn working() -> Self {
            let img = RgbImage::from_pixel(64, 48, Rgb([20, 120, 220]));
            let mut frame = Vec::new();
            image::DynamicImage::ImageRgb8(img)
                .write_to(&mut std::io::Cursor::new(&mut frame), image::ImageFormat::Png)
                .unwrap();
            Self {
                probe_json: Some(json!({
                    "streams": [
                        {
                            "codec_type": "video",
                            "codec_name": "h264",
                            "width": 640,
                            "height": 480,
                            "r_frame_rate": "25/1",
                            "nb_frames": "250",
                            "tags": { "rotate": "180" }
                        }
                    ],
                    "format": { "duration": "10.0", "bit_rate": "1000000" }
                })),
                frame: Some(frame),
            }
        }

        fn broken() -> Self {
            Self {
                probe_json: None,
                frame: None,
            }
        }
    }

    impl VideoProbe for FakeProbe {
        fn probe(&self, path: &Path) -> Result<serde_json::Value, IndexError> {
            self.probe_json
                .clone()
                .ok_or_else(|| IndexError::probe_error(path.into(), "ffprobe not found"))
        }

        fn grab_frame(&self, path: &Path) -> Result<Vec<u8>, IndexError> {
            self.frame
                .clone()
                .ok_or_else(|| IndexError::probe_error(path.into(), "ffmpeg not found"))
        }
    }

    /// Probe fake that cancels the scan from inside a worker, simulating a
    /// cancellation arriving while files are in flight
    #[derive(Default)]
    struct CancellingProbe {
        cancel: Mutex<Option<CancelToken>>,
        calls: AtomicUsize,
    }

    impl CancellingProbe {
        fn set_token(&self, token: CancelToken) {
            *self.cancel.lock().unwrap() = Some(token);
        }
    }

    impl VideoProbe for CancellingProbe {
        fn probe(&self, path: &Path) -> Result<serde_json::Value, IndexError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = self.cancel.lock().unwrap().as_ref() {
                token.cancel();
            }
            Err(IndexError::probe_error(path.into(), "probe interrupted"))
        }

        fn grab_frame(&self, path: &Path) -> Result<Vec<u8>, IndexError> {
            Err(IndexError::probe_error(path.into(), "probe interrupted"))
        }
    }

    fn write_png(dir: &Path, name: &str, pixel: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(32, 24, Rgb(pixel)).save(&path).unwrap();
        path
    }

    fn write_bytes(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    fn scan_dir(dir: &TempDir, db: &Path, probe: FakeProbe) -> ScanSummary {
        let config = ScanConfig::builder()
            .add_root(dir.path().to_path_buf())
            .db_path(db.to_path_buf())
            .num_threads(2)
            .build();
        Scanner::with_probe(config, Arc::new(probe)).run().unwrap()
    }

    #[test]
    fn test_mixed_directory_scan() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("catalog.db");

        let good = write_png(dir.path(), "good.png", [10, 200, 30]);
        let truncated = write_bytes(dir.path(), "broken.jpg", &[0xff, 0xd8, 0xff, 0xe0, 0x00]);
        let video = write_bytes(dir.path(), "clip.mp4", b"fake video payload");
        #[cfg(unix)]
        let dangling = {
            let link = dir.path().join("dangling.jpg");
            std::os::unix::fs::symlink("/nonexistent/target.jpg", &link).unwrap();
            link
        };

        let summary = scan_dir(&dir, &db, FakeProbe::working());
        #[cfg(unix)]
        assert_eq!(summary.total_files, 4);
        assert!(!summary.cancelled);

        let catalog = Catalog::open(&db).unwrap();

        // Healthy image: record + image_meta + hash_meta
        let good_path = good.to_string_lossy().to_string();
        let record = catalog.get_file(&good_path).unwrap().unwrap();
        assert!(record.is_image && record.is_usable && !record.is_corrupted);
        let id = catalog.file_id(&good_path).unwrap().unwrap();
        let image = catalog.get_image_meta(id).unwrap().unwrap();
        assert_eq!((image.width, image.height), (32, 24));
        let hashes = catalog.get_hash_meta(id).unwrap().unwrap();
        assert_eq!(hashes.sha256.len(), 64);
        assert!(hashes.phash.is_some());

        // Truncated image: corrupted, unusable, no meta rows
        let broken_path = truncated.to_string_lossy().to_string();
        let record = catalog.get_file(&broken_path).unwrap().unwrap();
        assert!(record.is_corrupted && !record.is_usable);
        assert!(record.read_error.is_some());
        let id = catalog.file_id(&broken_path).unwrap().unwrap();
        assert!(catalog.get_image_meta(id).unwrap().is_none());
        assert!(catalog.get_hash_meta(id).unwrap().is_none());

        // Video: record + video_meta + hash_meta via the fake probe
        let video_path = video.to_string_lossy().to_string();
        let record = catalog.get_file(&video_path).unwrap().unwrap();
        assert!(record.is_video && record.is_usable);
        let id = catalog.file_id(&video_path).unwrap().unwrap();
        let meta: VideoMeta = catalog.get_video_meta(id).unwrap().unwrap();
        assert_eq!(meta.rotation, Some(180));
        assert_eq!(meta.fps, Some(25.0));
        let hashes = catalog.get_hash_meta(id).unwrap().unwrap();
        assert!(hashes.ahash.is_some());

        // Dangling symlink: failed record, no meta rows
        #[cfg(unix)]
        {
            let dangling_path = dangling.to_string_lossy().to_string();
            let record = catalog.get_file(&dangling_path).unwrap().unwrap();
            assert!(!record.is_usable);
            assert!(record.read_error.is_some());
            let id = catalog.file_id(&dangling_path).unwrap().unwrap();
            assert!(catalog.get_hash_meta(id).unwrap().is_none());
        }
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("catalog.db");
        let good = write_png(dir.path(), "photo.png", [128, 128, 128]);
        let good_path = good.to_string_lossy().to_string();

        scan_dir(&dir, &db, FakeProbe::working());
        let catalog = Catalog::open(&db).unwrap();
        let count_before = catalog.file_count().unwrap();
        let id = catalog.file_id(&good_path).unwrap().unwrap();
        let meta_before = catalog.get_image_meta(id).unwrap();
        let hashes_before = catalog.get_hash_meta(id).unwrap();
        drop(catalog);

        scan_dir(&dir, &db, FakeProbe::working());
        let catalog = Catalog::open(&db).unwrap();
        assert_eq!(catalog.file_count().unwrap(), count_before);
        let id2 = catalog.file_id(&good_path).unwrap().unwrap();
        assert_eq!(id, id2);
        assert_eq!(catalog.get_image_meta(id2).unwrap(), meta_before);
        assert_eq!(catalog.get_hash_meta(id2).unwrap(), hashes_before);
    }

    #[test]
    fn test_identical_bytes_share_sha256() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("catalog.db");
        let a = write_png(dir.path(), "a.png", [1, 2, 3]);
        let b = dir.path().join("b.png");
        std::fs::copy(&a, &b).unwrap();

        scan_dir(&dir, &db, FakeProbe::working());
        let catalog = Catalog::open(&db).unwrap();
        let id = catalog
            .file_id(&a.to_string_lossy())
            .unwrap()
            .unwrap();
        let sha = catalog.get_hash_meta(id).unwrap().unwrap().sha256;
        let dupes = catalog.find_by_sha256(&sha).unwrap();
        assert_eq!(dupes.len(), 2);
    }

    #[test]
    fn test_zero_byte_file() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("catalog.db");
        let empty = write_bytes(dir.path(), "empty.jpg", &[]);

        scan_dir(&dir, &db, FakeProbe::working());
        let catalog = Catalog::open(&db).unwrap();
        let record = catalog
            .get_file(&empty.to_string_lossy())
            .unwrap()
            .unwrap();
        assert!(!record.is_usable);
        assert!(!record.is_corrupted);
        let id = catalog.file_id(&empty.to_string_lossy()).unwrap().unwrap();
        assert!(catalog.get_image_meta(id).unwrap().is_none());
        assert!(catalog.get_hash_meta(id).unwrap().is_none());
    }

    #[test]
    fn test_probe_failure_degrades_file_not_scan() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("catalog.db");
        let video = write_bytes(dir.path(), "clip.mp4", b"payload");
        let good = write_png(dir.path(), "still.png", [9, 9, 9]);

        let summary = scan_dir(&dir, &db, FakeProbe::broken());
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.failed, 1);

        let catalog = Catalog::open(&db).unwrap();
        let record = catalog
            .get_file(&video.to_string_lossy())
            .unwrap()
            .unwrap();
        assert!(record.is_video && !record.is_usable && !record.is_corrupted);
        assert!(record.read_error.as_deref().unwrap().contains("ffprobe"));
        let id = catalog.file_id(&video.to_string_lossy()).unwrap().unwrap();
        assert!(catalog.get_video_meta(id).unwrap().is_none());

        // The image next to it is unaffected
        let record = catalog.get_file(&good.to_string_lossy()).unwrap().unwrap();
        assert!(record.is_usable);
    }

    #[test]
    fn test_cancelled_scan_dispatches_nothing() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("catalog.db");
        write_png(dir.path(), "a.png", [5, 5, 5]);
        write_png(dir.path(), "b.png", [6, 6, 6]);

        let config = ScanConfig::builder()
            .add_root(dir.path().to_path_buf())
            .db_path(db.clone())
            .num_threads(1)
            .build();
        let scanner = Scanner::with_probe(config, Arc::new(FakeProbe::working()));
        scanner.cancel_token().cancel();
        let summary = scanner.run().unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.persisted, 0);
        let catalog = Catalog::open(&db).unwrap();
        assert_eq!(catalog.file_count().unwrap(), 0);
    }

    #[test]
    fn test_cancel_mid_run_leaves_whole_transactions() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("catalog.db");
        for i in 0..6 {
            write_bytes(dir.path(), &format!("clip{i}.mp4"), b"payload");
        }

        let config = ScanConfig::builder()
            .add_root(dir.path().to_path_buf())
            .db_path(db.clone())
            .num_threads(1)
            .build();
        let probe = Arc::new(CancellingProbe::default());
        let scanner = Scanner::with_probe(config, probe.clone());
        probe.set_token(scanner.cancel_token());
        let summary = scanner.run().unwrap();

        // The first probed file triggers cancellation; nothing else is
        // dispatched afterwards.
        assert!(summary.cancelled);
        assert_eq!(summary.total_files, 6);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.persisted, 0);
        assert_eq!(summary.failed, 1);

        // Exactly one whole per-file transaction committed
        let catalog = Catalog::open(&db).unwrap();
        assert_eq!(catalog.file_count().unwrap(), 1);
        let mut committed = 0;
        for i in 0..6 {
            let path = dir.path().join(format!("clip{i}.mp4"));
            let full_path = path.to_string_lossy().to_string();
            if let Some(record) = catalog.get_file(&full_path).unwrap() {
                committed += 1;
                assert!(!record.is_usable);
                assert!(record.read_error.is_some());
                let id = catalog.file_id(&full_path).unwrap().unwrap();
                assert!(catalog.get_video_meta(id).unwrap().is_none());
            }
        }
        assert_eq!(committed, 1);
    }

    #[test]
    fn test_catalog_database_is_not_indexed() {
        let dir = TempDir::new().unwrap();
        // The catalog lives inside the scanned root
        let db = dir.path().join("catalog.db");
        write_png(dir.path(), "only.png", [3, 3, 3]);

        let summary = scan_dir(&dir, &db, FakeProbe::working());
        assert_eq!(summary.total_files, 1);

        let catalog = Catalog::open(&db).unwrap();
        assert!(catalog
            .get_file(&db.to_string_lossy())
            .unwrap()
            .is_none());

        assert!(is_catalog_file(
            Path::new("/x/c.db-journal"),
            Some(Path::new("/x/c.db"))
        ));
        assert!(!is_catalog_file(
            Path::new("/x/c.db2"),
            Some(Path::new("/x/c.db"))
        ));
        assert!(!is_catalog_file(Path::new("/x/a.png"), None));
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_denied_file_is_failed_record() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let db = dir.path().join("catalog.db");
        let locked = write_png(dir.path(), "locked.png", [50, 50, 50]);
        let mut perms = std::fs::metadata(&locked).unwrap().permissions();
        perms.set_mode(0o000);
        std::fs::set_permissions(&locked, perms).unwrap();
        if std::fs::File::open(&locked).is_ok() {
            // Privileged user bypasses file modes; nothing to verify here
            return;
        }

        let summary = scan_dir(&dir, &db, FakeProbe::working());
        assert_eq!(summary.total_files, 1);
        assert_eq!(summary.failed, 1);

        let catalog = Catalog::open(&db).unwrap();
        let full_path = locked.to_string_lossy().to_string();
        let record = catalog.get_file(&full_path).unwrap().unwrap();
        assert!(!record.is_usable);
        assert!(!record.is_corrupted);
        assert!(record.read_error.is_some());
        let id = catalog.file_id(&full_path).unwrap().unwrap();
        assert!(catalog.get_image_meta(id).unwrap().is_none());
        assert!(catalog.get_hash_meta(id).unwrap().is_none());
    }

    #[test]
    fn test_writer_counts_usable_and_failed_separately() {
        let catalog = Catalog::open_memory().unwrap();
        let (tx, rx) = bounded(4);
        let reporter = Arc::new(ProgressReporter::new(false, 0));

        let classification = Classification {
            kind: MediaKind::Image,
            mime_type: "image/png".to_string(),
            readable: true,
            error: None,
        };
        let mut good =
            ProcessedFile::new(FileRecord::new(Path::new("/p/ok.png"), 5, &classification));
        good.stage = Stage::Hashing;
        let mut bad =
            ProcessedFile::new(FileRecord::new(Path::new("/p/bad.png"), 5, &classification));
        bad.record.mark_failed("decode exploded");
        bad.stage = Stage::Failed;

        tx.send(good).unwrap();
        tx.send(bad).unwrap();
        drop(tx);

        let totals = writer_loop(catalog, rx, 1, reporter);
        assert_eq!(totals.persisted, 1);
        assert_eq!(totals.failed, 1);
        assert_eq!(totals.images, 2);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let config = ScanConfig::builder()
            .add_root(PathBuf::from("/nonexistent/root"))
            .build();
        let err = Scanner::with_probe(config, Arc::new(FakeProbe::working()))
            .run()
            .unwrap_err();
        assert_eq!(err.kind, IndexErrorKind::NotFound);
    }

    #[test]
    fn test_ignored_directories_are_skipped() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("catalog.db");
        write_png(dir.path(), "keep.png", [1, 1, 1]);
        let hidden = dir.path().join(".thumbnails");
        std::fs::create_dir(&hidden).unwrap();
        write_png(&hidden, "skip.png", [2, 2, 2]);

        let summary = scan_dir(&dir, &db, FakeProbe::working());
        assert_eq!(summary.total_files, 1);
    }

    #[test]
    fn test_process_file_stages() {
        let dir = TempDir::new().unwrap();
        let good = write_png(dir.path(), "a.png", [7, 7, 7]);
        let probe = FakeProbe::working();

        let file = process_file(&good, &probe);
        assert_eq!(file.stage, Stage::Hashing);
        assert!(file.record.is_usable);

        let broken = write_bytes(dir.path(), "b.jpg", &[0xff, 0xd8, 0xff]);
        let file = process_file(&broken, &probe);
        assert_eq!(file.stage, Stage::Failed);
        assert!(file.record.is_corrupted);
        assert_eq!(file.error_kind, Some(IndexErrorKind::DecodeError));
    }
}
