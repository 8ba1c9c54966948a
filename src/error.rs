//! Error types for the indexing pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Error kinds that can occur while indexing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexErrorKind {
    /// Permission denied when accessing a file or directory
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// I/O error during file operations
    IoError,
    /// Unsupported or corrupt image/video payload
    DecodeError,
    /// External probe tool missing, timed out, or returned malformed data
    ProbeError,
    /// Catalog transaction or storage failure
    PersistenceError,
    /// Invalid path encoding
    InvalidPath,
}

impl IndexErrorKind {
    /// Short identifier used in progress messages and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexErrorKind::PermissionDenied => "permission",
            IndexErrorKind::NotFound => "not_found",
            IndexErrorKind::IoError => "io",
            IndexErrorKind::DecodeError => "decode",
            IndexErrorKind::ProbeError => "probe",
            IndexErrorKind::PersistenceError => "persistence",
            IndexErrorKind::InvalidPath => "invalid_path",
        }
    }
}

/// Represents an error that occurred while indexing a file
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct IndexError {
    /// The kind of error
    pub kind: IndexErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

impl IndexError {
    /// Create a new index error
    pub fn new(kind: IndexErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::PermissionDenied, Some(path), message)
    }

    /// Create a not found error
    pub fn not_found(path: PathBuf) -> Self {
        Self::new(
            IndexErrorKind::NotFound,
            Some(path.clone()),
            format!("Not found: {}", path.display()),
        )
    }

    /// Create an I/O error
    pub fn io_error(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::IoError, path, message)
    }

    /// Create a decode error
    pub fn decode_error(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::DecodeError, Some(path), message)
    }

    /// Create a probe error
    pub fn probe_error(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::ProbeError, Some(path), message)
    }

    /// Create a persistence error
    pub fn persistence_error(message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::PersistenceError, None, message)
    }

    /// Whether this error came from an unreadable path rather than bad content
    pub fn is_read_failure(&self) -> bool {
        matches!(
            self.kind,
            IndexErrorKind::PermissionDenied | IndexErrorKind::NotFound | IndexErrorKind::IoError
        )
    }

    /// Attach a path to an error produced by a `From` conversion
    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => IndexErrorKind::PermissionDenied,
            std::io::ErrorKind::NotFound => IndexErrorKind::NotFound,
            _ => IndexErrorKind::IoError,
        };
        Self::new(kind, None, err.to_string())
    }
}

impl From<rusqlite::Error> for IndexError {
    fn from(err: rusqlite::Error) -> Self {
        Self::persistence_error(err.to_string())
    }
}

impl From<image::ImageError> for IndexError {
    fn from(err: image::ImageError) -> Self {
        Self::new(IndexErrorKind::DecodeError, None, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kind_mapping() {
        let err: IndexError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.kind, IndexErrorKind::PermissionDenied);
        assert!(err.is_read_failure());

        let err: IndexError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind, IndexErrorKind::NotFound);
    }

    #[test]
    fn test_probe_error_is_not_read_failure() {
        let err = IndexError::probe_error(PathBuf::from("/tmp/a.mp4"), "ffprobe exited 1");
        assert!(!err.is_read_failure());
        assert_eq!(err.kind.as_str(), "probe");
    }

    #[test]
    fn test_with_path() {
        let err: IndexError = std::io::Error::other("boom").into();
        assert!(err.path.is_none());
        let err = err.with_path(PathBuf::from("/x"));
        assert_eq!(err.path.as_deref(), Some(std::path::Path::new("/x")));
    }
}
