//! Path classification: media kind and readability without decoding
//!
//! Classification combines the file extension with a magic-byte sniff so
//! mislabeled extensions land in the right kind. It never decodes payloads
//! and never touches the catalog.

use log::warn;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::models::{Classification, MediaKind};

/// Bytes read from the head of a file for magic-byte detection
const SNIFF_LEN: usize = 1024;

/// Classify a filesystem entry.
///
/// Zero-byte files come back as `Other` with an error set (unusable but not
/// corrupted). Entries that cannot be stat'd or opened come back unreadable
/// with the error populated.
pub fn classify(path: &Path) -> Classification {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            return Classification {
                kind: MediaKind::Other,
                mime_type: "application/octet-stream".to_string(),
                readable: false,
                error: Some(format!("cannot stat: {e}")),
            }
        }
    };

    if metadata.len() == 0 {
        return Classification {
            kind: MediaKind::Other,
            mime_type: "application/octet-stream".to_string(),
            readable: true,
            error: Some("zero-length file".to_string()),
        };
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    let ext_kind = MediaKind::from_extension(&ext);

    let mut head = [0u8; SNIFF_LEN];
    let read = match File::open(path).and_then(|mut f| f.read(&mut head)) {
        Ok(n) => n,
        Err(e) => {
            return Classification {
                kind: ext_kind,
                mime_type: mime_from_extension(&ext),
                readable: false,
                error: Some(format!("cannot open: {e}")),
            }
        }
    };

    match infer::get(&head[..read]) {
        Some(detected) => {
            let mime = detected.mime_type().to_string();
            let sniffed_kind = MediaKind::from_mime(&mime);
            // A recognizable signature that disagrees with the extension wins
            let kind = if sniffed_kind != MediaKind::Other {
                if ext_kind != MediaKind::Other && ext_kind != sniffed_kind {
                    warn!(
                        "extension/content mismatch: {} (ext {:?}, content {})",
                        path.display(),
                        ext_kind,
                        mime
                    );
                }
                sniffed_kind
            } else {
                ext_kind
            };
            Classification {
                kind,
                mime_type: mime,
                readable: true,
                error: None,
            }
        }
        None => Classification {
            kind: ext_kind,
            mime_type: mime_from_extension(&ext),
            readable: true,
            error: None,
        },
    }
}

/// Guess a MIME type from the extension alone, for files `infer` cannot sniff
fn mime_from_extension(ext: &str) -> String {
    let mime = match ext {
        "jpg" | "jpeg" | "mpo" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tiff" | "tif" => "image/tiff",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "ts" => "video/mp2t",
        "3gp" => "video/3gpp",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "wma" => "audio/x-ms-wma",
        _ => "application/octet-stream",
    };
    mime.to_string()
}
