//! Catalog storage: the four-table schema and idempotent per-file writes
//!
//! `Catalog` is the sole writer of the `files`, `image_meta`, `video_meta`
//! and `hash_meta` tables. Each file is committed in a single transaction so
//! a crash can never leave a usable record without its meta rows or a meta
//! row pointing at a missing file.

use log::warn;
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use std::time::Duration;

use crate::error::IndexError;
use crate::models::{FileRecord, HashMeta, ImageMeta, ProcessedFile, VideoMeta};

/// Backoff unit between persistence retries
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Catalog database handle
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Open or create a catalog database
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory catalog (for testing)
    pub fn open_memory() -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), IndexError> {
        self.conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                full_path TEXT NOT NULL UNIQUE,
                filename TEXT NOT NULL,
                basename TEXT NOT NULL,
                extension TEXT,
                mime_type TEXT,
                size INTEGER NOT NULL,
                created_date TEXT,
                modified_date TEXT,
                birth_date TEXT,
                year INTEGER,
                month INTEGER,
                inode INTEGER,
                is_image INTEGER NOT NULL DEFAULT 0,
                is_video INTEGER NOT NULL DEFAULT 0,
                is_audio INTEGER NOT NULL DEFAULT 0,
                is_corrupted INTEGER NOT NULL DEFAULT 0,
                read_error TEXT,
                is_usable INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_files_basename ON files(basename);
            CREATE INDEX IF NOT EXISTS idx_files_year_month ON files(year, month);

            CREATE TABLE IF NOT EXISTS image_meta (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL UNIQUE REFERENCES files(id) ON DELETE CASCADE,
                width INTEGER,
                height INTEGER,
                brightness_mean REAL,
                hist_16bins TEXT,
                exif_datetime_original TEXT,
                exif_camera_model TEXT,
                exif_lens TEXT,
                exif_orientation INTEGER,
                exif_iso REAL,
                exif_fnumber REAL,
                exif_exposure_time REAL,
                exif_focal_length REAL,
                gps_lat REAL,
                gps_lon REAL
            );

            CREATE TABLE IF NOT EXISTS video_meta (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL UNIQUE REFERENCES files(id) ON DELETE CASCADE,
                width INTEGER,
                height INTEGER,
                duration REAL,
                fps REAL,
                bitrate INTEGER,
                nb_frames INTEGER,
                rotation INTEGER,
                video_codec TEXT,
                audio_codec TEXT
            );

            CREATE TABLE IF NOT EXISTS hash_meta (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL UNIQUE REFERENCES files(id) ON DELETE CASCADE,
                sha256 TEXT,
                phash TEXT,
                ahash TEXT,
                dhash TEXT,
                whash TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_hash_sha256 ON hash_meta(sha256);
            ",
        )?;
        Ok(())
    }

    /// Persist one fully-resolved file in a single transaction.
    ///
    /// Idempotent: the upsert keys on `full_path` and the meta rows are
    /// replaced, so re-scanning an unchanged file rewrites identical rows
    /// instead of duplicating them.
    pub fn persist(&mut self, file: &ProcessedFile) -> Result<i64, IndexError> {
        let tx = self.conn.transaction()?;
        let file_id = upsert_record(&tx, &file.record)?;

        // Stale meta rows from a previous scan pass are cleared first; a
        // file that became corrupted since then must lose its meta rows.
        tx.execute("DELETE FROM image_meta WHERE file_id = ?1", params![file_id])?;
        tx.execute("DELETE FROM video_meta WHERE file_id = ?1", params![file_id])?;
        tx.execute("DELETE FROM hash_meta WHERE file_id = ?1", params![file_id])?;

        if !file.record.is_corrupted {
            if let Some(image) = file.image.as_ref().filter(|_| file.record.is_image) {
                insert_image_meta(&tx, file_id, image)?;
            }
            if let Some(video) = file.video.as_ref().filter(|_| file.record.is_video) {
                insert_video_meta(&tx, file_id, video)?;
            }
            if let Some(hashes) = &file.hashes {
                insert_hash_meta(&tx, file_id, hashes)?;
            }
        }

        tx.commit()?;
        Ok(file_id)
    }

    /// Persist with a bounded retry, then fall back to a minimal failure row.
    ///
    /// After `retries` failed attempts the file is recorded with
    /// `is_usable = 0` and the persistence error in `read_error`, so every
    /// discovered path still lands in the catalog exactly once.
    pub fn persist_with_retry(
        &mut self,
        file: &mut ProcessedFile,
        retries: u32,
    ) -> Result<i64, IndexError> {
        let attempts = retries.max(1);
        let mut last_err: Option<IndexError> = None;
        for attempt in 1..=attempts {
            match self.persist(file) {
                Ok(id) => return Ok(id),
                Err(e) => {
                    warn!(
                        "persist attempt {}/{} failed for {}: {}",
                        attempt, attempts, file.record.full_path, e
                    );
                    last_err = Some(e);
                    if attempt < attempts {
                        std::thread::sleep(RETRY_BACKOFF * attempt);
                    }
                }
            }
        }

        let err = last_err.unwrap_or_else(|| IndexError::persistence_error("unknown failure"));
        file.record.mark_failed(format!("persistence failed: {}", err.message));
        file.image = None;
        file.video = None;
        file.hashes = None;
        // The failure may be confined to a meta table, so the fallback
        // writes the files row alone.
        let tx = self.conn.transaction()?;
        upsert_record(&tx, &file.record)?;
        tx.commit()?;
        Err(err)
    }

    /// Number of rows in `files`
    pub fn file_count(&self) -> Result<u64, IndexError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Look up a file id by full path
    pub fn file_id(&self, full_path: &str) -> Result<Option<i64>, IndexError> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM files WHERE full_path = ?1",
                params![full_path],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;
        Ok(id)
    }

    /// Load a file record by full path
    pub fn get_file(&self, full_path: &str) -> Result<Option<FileRecord>, IndexError> {
        let record = self
            .conn
            .query_row(
                "SELECT full_path, filename, basename, extension, mime_type, size,
                        created_date, modified_date, birth_date, year, month, inode,
                        is_image, is_video, is_audio, is_corrupted, read_error, is_usable
                 FROM files WHERE full_path = ?1",
                params![full_path],
                |row| {
                    Ok(FileRecord {
                        full_path: row.get(0)?,
                        filename: row.get(1)?,
                        basename: row.get(2)?,
                        extension: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        mime_type: row.get(4)?,
                        size: row.get::<_, i64>(5)? as u64,
                        created_date: row.get(6)?,
                        modified_date: row.get(7)?,
                        birth_date: row.get(8)?,
                        year: row.get(9)?,
                        month: row.get(10)?,
                        inode: row.get::<_, Option<i64>>(11)?.map(|i| i as u64),
                        is_image: row.get(12)?,
                        is_video: row.get(13)?,
                        is_audio: row.get(14)?,
                        is_corrupted: row.get(15)?,
                        read_error: row.get(16)?,
                        is_usable: row.get(17)?,
                    })
                },
            )
            .map(Some)
            .or_else(ignore_no_rows)?;
        Ok(record)
    }

    /// Load the image meta row for a file id
    pub fn get_image_meta(&self, file_id: i64) -> Result<Option<ImageMeta>, IndexError> {
        let meta = self
            .conn
            .query_row(
                "SELECT width, height, brightness_mean, hist_16bins,
                        exif_datetime_original, exif_camera_model, exif_lens,
                        exif_orientation, exif_iso, exif_fnumber,
                        exif_exposure_time, exif_focal_length, gps_lat, gps_lon
                 FROM image_meta WHERE file_id = ?1",
                params![file_id],
                |row| {
                    let hist_json: Option<String> = row.get(3)?;
                    Ok(ImageMeta {
                        width: row.get::<_, i64>(0)? as u32,
                        height: row.get::<_, i64>(1)? as u32,
                        brightness_mean: row.get(2)?,
                        hist_16bins: hist_json.and_then(|j| serde_json::from_str(&j).ok()),
                        exif_datetime_original: row.get(4)?,
                        exif_camera_model: row.get(5)?,
                        exif_lens: row.get(6)?,
                        exif_orientation: row.get::<_, Option<i64>>(7)?.map(|o| o as u16),
                        exif_iso: row.get(8)?,
                        exif_fnumber: row.get(9)?,
                        exif_exposure_time: row.get(10)?,
                        exif_focal_length: row.get(11)?,
                        gps_lat: row.get(12)?,
                        gps_lon: row.get(13)?,
                    })
                },
            )
            .map(Some)
            .or_else(ignore_no_rows)?;
        Ok(meta)
    }

    /// Load the video meta row for a file id
    pub fn get_video_meta(&self, file_id: i64) -> Result<Option<VideoMeta>, IndexError> {
        let meta = self
            .conn
            .query_row(
                "SELECT width, height, duration, fps, bitrate, nb_frames,
                        rotation, video_codec, audio_codec
                 FROM video_meta WHERE file_id = ?1",
                params![file_id],
                |row| {
                    Ok(VideoMeta {
                        width: row.get::<_, Option<i64>>(0)?.map(|v| v as u32),
                        height: row.get::<_, Option<i64>>(1)?.map(|v| v as u32),
                        duration: row.get(2)?,
                        fps: row.get(3)?,
                        bitrate: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
                        nb_frames: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
                        rotation: row.get::<_, Option<i64>>(6)?.map(|v| v as u32),
                        video_codec: row.get(7)?,
                        audio_codec: row.get(8)?,
                    })
                },
            )
            .map(Some)
            .or_else(ignore_no_rows)?;
        Ok(meta)
    }

    /// Load the hash meta row for a file id
    pub fn get_hash_meta(&self, file_id: i64) -> Result<Option<HashMeta>, IndexError> {
        let meta = self
            .conn
            .query_row(
                "SELECT sha256, ahash, dhash, phash, whash FROM hash_meta WHERE file_id = ?1",
                params![file_id],
                |row| {
                    Ok(HashMeta {
                        sha256: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                        ahash: row.get(1)?,
                        dhash: row.get(2)?,
                        phash: row.get(3)?,
                        whash: row.get(4)?,
                    })
                },
            )
            .map(Some)
            .or_else(ignore_no_rows)?;
        Ok(meta)
    }

    /// Paths of all files whose content digest matches (exact-duplicate lookup)
    pub fn find_by_sha256(&self, sha256: &str) -> Result<Vec<String>, IndexError> {
        let mut stmt = self.conn.prepare(
            "SELECT f.full_path FROM files f
             JOIN hash_meta h ON h.file_id = f.id
             WHERE h.sha256 = ?1
             ORDER BY f.full_path",
        )?;
        let rows = stmt.query_map(params![sha256], |row| row.get(0))?;
        let mut paths = Vec::new();
        for row in rows {
            paths.push(row?);
        }
        Ok(paths)
    }
}

fn ignore_no_rows<T>(err: rusqlite::Error) -> Result<Option<T>, rusqlite::Error> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

fn upsert_record(tx: &Transaction<'_>, record: &FileRecord) -> Result<i64, IndexError> {
    tx.execute(
        "INSERT INTO files (
            full_path, filename, basename, extension, mime_type, size,
            created_date, modified_date, birth_date, year, month, inode,
            is_image, is_video, is_audio, is_corrupted, read_error, is_usable
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)
         ON CONFLICT(full_path) DO UPDATE SET
            filename = excluded.filename,
            basename = excluded.basename,
            extension = excluded.extension,
            mime_type = excluded.mime_type,
            size = excluded.size,
            created_date = excluded.created_date,
            modified_date = excluded.modified_date,
            birth_date = excluded.birth_date,
            year = excluded.year,
            month = excluded.month,
            inode = excluded.inode,
            is_image = excluded.is_image,
            is_video = excluded.is_video,
            is_audio = excluded.is_audio,
            is_corrupted = excluded.is_corrupted,
            read_error = excluded.read_error,
            is_usable = excluded.is_usable",
        params![
            record.full_path,
            record.filename,
            record.basename,
            record.extension,
            record.mime_type,
            record.size as i64,
            record.created_date,
            record.modified_date,
            record.birth_date,
            record.year,
            record.month,
            record.inode.map(|i| i as i64),
            record.is_image,
            record.is_video,
            record.is_audio,
            record.is_corrupted,
            record.read_error,
            record.is_usable,
        ],
    )?;
    let id: i64 = tx.query_row(
        "SELECT id FROM files WHERE full_path = ?1",
        params![record.full_path],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn insert_image_meta(tx: &Transaction<'_>, file_id: i64, meta: &ImageMeta) -> Result<(), IndexError> {
    let hist_json = meta
        .hist_16bins
        .as_ref()
        .map(|h| serde_json::to_string(h))
        .transpose()
        .map_err(|e| IndexError::persistence_error(e.to_string()))?;
    tx.execute(
        "INSERT INTO image_meta (
            file_id, width, height, brightness_mean, hist_16bins,
            exif_datetime_original, exif_camera_model, exif_lens,
            exif_orientation, exif_iso, exif_fnumber,
            exif_exposure_time, exif_focal_length, gps_lat, gps_lon
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
        params![
            file_id,
            meta.width,
            meta.height,
            meta.brightness_mean,
            hist_json,
            meta.exif_datetime_original,
            meta.exif_camera_model,
            meta.exif_lens,
            meta.exif_orientation,
            meta.exif_iso,
            meta.exif_fnumber,
            meta.exif_exposure_time,
            meta.exif_focal_length,
            meta.gps_lat,
            meta.gps_lon,
        ],
    )?;
    Ok(())
}

fn insert_video_meta(tx: &Transaction<'_>, file_id: i64, meta: &VideoMeta) -> Result<(), IndexError> {
    tx.execute(
        "INSERT INTO video_meta (
            file_id, width, height, duration, fps, bitrate, nb_frames,
            rotation, video_codec, audio_codec
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
        params![
            file_id,
            meta.width,
            meta.height,
            meta.duration,
            meta.fps,
            meta.bitrate.map(|b| b as i64),
            meta.nb_frames.map(|n| n as i64),
            meta.rotation,
            meta.video_codec,
            meta.audio_codec,
        ],
    )?;
    Ok(())
}

fn insert_hash_meta(tx: &Transaction<'_>, file_id: i64, meta: &HashMeta) -> Result<(), IndexError> {
    tx.execute(
        "INSERT INTO hash_meta (file_id, sha256, phash, ahash, dhash, whash)
         VALUES (?1,?2,?3,?4,?5,?6)",
        params![
            file_id,
            meta.sha256,
            meta.phash,
            meta.ahash,
            meta.dhash,
            meta.whash,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexErrorKind;
    use crate::models::{Classification, MediaKind, ProcessedFile, Stage};
    use std::path::Path;

    fn image_classification() -> Classification {
        Classification {
            kind: MediaKind::Image,
            mime_type: "image/jpeg".to_string(),
            readable: true,
            error: None,
        }
    }

    fn image_file(path: &str) -> ProcessedFile {
        let mut record = FileRecord::new(Path::new(path), 1234, &image_classification());
        record.modified_date = Some("2022-03-04T05:06:07".to_string());
        record.apply_canonical_date(Some("2021-01-02T03:04:05"));
        let mut file = ProcessedFile::new(record);
        file.image = Some(ImageMeta {
            width: 640,
            height: 480,
            brightness_mean: Some(127.5),
            hist_16bins: Some(vec![0; 16]),
            exif_camera_model: Some("TestCam".to_string()),
            ..Default::default()
        });
        file.hashes = Some(HashMeta {
            sha256: "ab".repeat(32),
            ahash: Some("00ff00ff00ff00ff".to_string()),
            dhash: Some("0123456789abcdef".to_string()),
            phash: Some("fedcba9876543210".to_string()),
            whash: None,
        });
        file.stage = Stage::Hashing;
        file
    }

    #[test]
    fn test_persist_and_read_back() {
        let mut db = Catalog::open_memory().unwrap();
        let file = image_file("/photos/a.jpg");
        let id = db.persist(&file).unwrap();

        let record = db.get_file("/photos/a.jpg").unwrap().unwrap();
        assert!(record.is_image);
        assert_eq!(record.year, Some(2021));
        assert_eq!(record.month, Some(1));

        let image = db.get_image_meta(id).unwrap().unwrap();
        assert_eq!(image.width, 640);
        assert_eq!(image.exif_camera_model.as_deref(), Some("TestCam"));
        assert_eq!(image.hist_16bins.as_deref(), Some(&[0u64; 16][..]));

        let hashes = db.get_hash_meta(id).unwrap().unwrap();
        assert_eq!(hashes.sha256, "ab".repeat(32));
        // A failed perceptual hash stays null
        assert!(hashes.whash.is_none());
    }

    #[test]
    fn test_persist_twice_is_idempotent() {
        let mut db = Catalog::open_memory().unwrap();
        let file = image_file("/photos/a.jpg");

        let id1 = db.persist(&file).unwrap();
        let first = db.get_image_meta(id1).unwrap();
        let id2 = db.persist(&file).unwrap();
        let second = db.get_image_meta(id2).unwrap();

        assert_eq!(id1, id2);
        assert_eq!(db.file_count().unwrap(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_corrupted_file_gets_no_meta_rows() {
        let mut db = Catalog::open_memory().unwrap();
        let mut file = image_file("/photos/bad.jpg");
        file.record.mark_corrupted("truncated");
        let id = db.persist(&file).unwrap();

        let record = db.get_file("/photos/bad.jpg").unwrap().unwrap();
        assert!(record.is_corrupted);
        assert!(!record.is_usable);
        assert!(db.get_image_meta(id).unwrap().is_none());
        assert!(db.get_hash_meta(id).unwrap().is_none());
    }

    #[test]
    fn test_rescan_after_corruption_drops_stale_meta() {
        let mut db = Catalog::open_memory().unwrap();
        let mut file = image_file("/photos/a.jpg");
        let id = db.persist(&file).unwrap();
        assert!(db.get_image_meta(id).unwrap().is_some());

        // Same path re-scanned after the file broke on disk
        file.record.mark_corrupted("decode error");
        let id2 = db.persist(&file).unwrap();
        assert_eq!(id, id2);
        assert!(db.get_image_meta(id).unwrap().is_none());
        assert!(db.get_hash_meta(id).unwrap().is_none());
    }

    #[test]
    fn test_other_kind_gets_files_row_only() {
        let mut db = Catalog::open_memory().unwrap();
        let classification = Classification {
            kind: MediaKind::Other,
            mime_type: "application/octet-stream".to_string(),
            readable: true,
            error: None,
        };
        let record = FileRecord::new(Path::new("/docs/x.pdf"), 9, &classification);
        let file = ProcessedFile::new(record);
        let id = db.persist(&file).unwrap();

        assert_eq!(db.file_count().unwrap(), 1);
        assert!(db.get_image_meta(id).unwrap().is_none());
        assert!(db.get_video_meta(id).unwrap().is_none());
        assert!(db.get_hash_meta(id).unwrap().is_none());
    }

    #[test]
    fn test_find_by_sha256() {
        let mut db = Catalog::open_memory().unwrap();
        db.persist(&image_file("/photos/a.jpg")).unwrap();
        db.persist(&image_file("/photos/copy of a.jpg")).unwrap();

        let dupes = db.find_by_sha256(&"ab".repeat(32)).unwrap();
        assert_eq!(dupes, vec!["/photos/a.jpg", "/photos/copy of a.jpg"]);
    }

    #[test]
    fn test_retry_exhaustion_records_failure_row() {
        let mut db = Catalog::open_memory().unwrap();
        // Break persistence for hashed files only; the files table stays intact
        db.conn.execute_batch("DROP TABLE hash_meta").unwrap();

        let mut file = image_file("/photos/a.jpg");
        let err = db.persist_with_retry(&mut file, 2).unwrap_err();
        assert_eq!(err.kind, IndexErrorKind::PersistenceError);

        // The path still lands in the catalog as a failure row
        let record = db.get_file("/photos/a.jpg").unwrap().unwrap();
        assert!(!record.is_usable);
        assert!(record
            .read_error
            .as_deref()
            .unwrap()
            .starts_with("persistence failed"));
        let id = db.file_id("/photos/a.jpg").unwrap().unwrap();
        assert!(db.get_image_meta(id).unwrap().is_none());
    }

    #[test]
    fn test_meta_row_unique_per_file() {
        let mut db = Catalog::open_memory().unwrap();
        let file = image_file("/photos/a.jpg");
        let id = db.persist(&file).unwrap();
        db.persist(&file).unwrap();

        let count: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM image_meta WHERE file_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
