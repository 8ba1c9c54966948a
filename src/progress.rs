//! Progress reporting for scan operations
//!
//! Emits line-delimited JSON messages to stderr so an embedding process can
//! follow a running scan. Message types: `start`, `p` (progress), `err`,
//! `done`; every message carries a sequence number and a timestamp relative
//! to reporter creation.

use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::models::ScanSummary;

/// Start message sent when the scan begins
#[derive(Debug, Clone, Serialize)]
pub struct StartMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    /// Scan root paths
    pub roots: Vec<String>,
    pub recursive: bool,
}

/// Progress message sent while files are being processed
#[derive(Debug, Clone, Serialize)]
pub struct ProgressMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    /// Files committed or failed so far
    #[serde(rename = "f")]
    pub files: u64,
    #[serde(rename = "v")]
    pub video_count: u64,
    #[serde(rename = "i")]
    pub image_count: u64,
    #[serde(rename = "a")]
    pub audio_count: u64,
    /// Path most recently processed
    pub path: String,
}

/// Error message for a per-file failure
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    /// Error category (permission, decode, probe, persistence, ...)
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Final message with the scan summary
#[derive(Debug, Clone, Serialize)]
pub struct DoneMessage {
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    #[serde(rename = "tf")]
    pub total_files: u64,
    #[serde(rename = "td")]
    pub total_dirs: u64,
    pub persisted: u64,
    pub failed: u64,
    pub cancelled: bool,
    pub ms: u64,
}

/// Rate-limited stderr JSON reporter. Shareable across threads.
pub struct ProgressReporter {
    enabled: bool,
    interval_ms: u64,
    /// Milliseconds since `start_time` of the last progress message
    last_report_ms: AtomicU64,
    seq: AtomicU64,
    start_time: Instant,
}

impl ProgressReporter {
    /// Create a reporter; `interval_ms` gates how often `p` messages go out
    pub fn new(enabled: bool, interval_ms: u64) -> Self {
        Self {
            enabled,
            interval_ms,
            last_report_ms: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Whether the progress interval has elapsed since the last report
    pub fn should_report(&self) -> bool {
        if !self.enabled {
            return false;
        }
        self.elapsed_ms() - self.last_report_ms.load(Ordering::Relaxed) >= self.interval_ms
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    fn emit<T: Serialize>(&self, message: &T) {
        if !self.enabled {
            return;
        }
        if let Ok(json) = serde_json::to_string(message) {
            eprintln!("{json}");
            std::io::stderr().flush().ok();
        }
    }

    /// Emit the start message
    pub fn start(&self, roots: &[String], recursive: bool) {
        self.emit(&StartMessage {
            msg_type: "start",
            seq: self.next_seq(),
            ts: self.elapsed_ms(),
            roots: roots.to_vec(),
            recursive,
        });
    }

    /// Emit a progress message and reset the interval gate
    pub fn progress(
        &self,
        files: u64,
        image_count: u64,
        video_count: u64,
        audio_count: u64,
        path: &str,
    ) {
        self.emit(&ProgressMessage {
            msg_type: "p",
            seq: self.next_seq(),
            ts: self.elapsed_ms(),
            files,
            video_count,
            image_count,
            audio_count,
            path: path.to_string(),
        });
        self.last_report_ms.store(self.elapsed_ms(), Ordering::Relaxed);
    }

    /// Emit a per-file error message
    pub fn error(&self, error_type: &str, message: &str, path: Option<&str>) {
        self.emit(&ErrorMessage {
            msg_type: "err",
            seq: self.next_seq(),
            ts: self.elapsed_ms(),
            error_type: error_type.to_string(),
            message: message.to_string(),
            path: path.map(str::to_string),
        });
    }

    /// Emit the final summary message
    pub fn done(&self, summary: &ScanSummary) {
        self.emit(&DoneMessage {
            msg_type: "done",
            seq: self.next_seq(),
            ts: self.elapsed_ms(),
            total_files: summary.total_files,
            total_dirs: summary.total_dirs,
            persisted: summary.persisted,
            failed: summary.failed,
            cancelled: summary.cancelled,
            ms: summary.duration_ms,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_reporter_never_reports() {
        let reporter = ProgressReporter::new(false, 0);
        assert!(!reporter.should_report());
    }

    #[test]
    fn test_interval_gate() {
        let reporter = ProgressReporter::new(true, 0);
        assert!(reporter.should_report());

        let slow = ProgressReporter::new(true, 60_000);
        assert!(!slow.should_report());
    }

    #[test]
    fn test_message_serialization() {
        let msg = ProgressMessage {
            msg_type: "p",
            seq: 3,
            ts: 120,
            files: 10,
            video_count: 1,
            image_count: 8,
            audio_count: 0,
            path: "/photos/a.jpg".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"_t\":\"p\""));
        assert!(json.contains("\"f\":10"));
    }
}
