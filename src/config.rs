//! Configuration for the indexing pipeline

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Side length of the perceptual hash grid (digests are size² bits).
///
/// Changing this invalidates comparability with perceptual hashes already
/// stored in a catalog; it is a schema-level compatibility constant, not a
/// tuning knob.
pub const PERCEPTUAL_HASH_SIZE: u32 = 8;

/// Default timeout for a single ffprobe/ffmpeg invocation
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 30;

/// Default number of attempts for a failed catalog transaction
pub const DEFAULT_PERSIST_RETRIES: u32 = 3;

/// Default max depth for recursive scanning (effectively unbounded)
pub const DEFAULT_MAX_DEPTH: usize = usize::MAX;

/// Configuration for a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Root directories to scan
    pub roots: Vec<PathBuf>,

    /// Directory names to ignore
    pub ignore_dirs: HashSet<String>,

    /// Number of worker threads for extraction/hashing
    /// 0 means auto-detect
    pub num_threads: usize,

    /// Catalog database path (None selects an in-memory catalog)
    pub db_path: Option<PathBuf>,

    /// Timeout for each external probe subprocess, in seconds
    pub probe_timeout_secs: u64,

    /// Attempts for a failed catalog transaction before recording the file
    /// as failed
    pub persist_retries: u32,

    /// Whether to scan subdirectories recursively
    pub recursive: bool,

    /// Maximum depth for recursive scanning
    pub max_depth: usize,

    /// Whether to emit progress messages to stderr
    pub show_progress: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            ignore_dirs: Self::default_ignore_dirs(),
            num_threads: 0,
            db_path: None,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            persist_retries: DEFAULT_PERSIST_RETRIES,
            recursive: true,
            max_depth: DEFAULT_MAX_DEPTH,
            show_progress: false,
        }
    }
}

impl ScanConfig {
    /// Create a new config with the given root directories
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            ..Default::default()
        }
    }

    /// Create a config builder
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::new()
    }

    /// Get the default directories to ignore
    pub fn default_ignore_dirs() -> HashSet<String> {
        [
            "$RECYCLE.BIN",
            "System Volume Information",
            ".Trash",
            ".Trash-1000",
            "@eaDir",
            ".git",
            ".svn",
            "node_modules",
            "__pycache__",
            ".cache",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Check if a directory should be ignored
    pub fn should_ignore_dir(&self, name: &str) -> bool {
        // Hidden directories are always skipped
        if name.starts_with('.') {
            return true;
        }
        self.ignore_dirs.contains(name)
    }

    /// Get the effective number of worker threads
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.num_threads
        }
    }

    /// Get the effective max depth for walkdir
    pub fn effective_max_depth(&self) -> usize {
        if !self.recursive {
            1 // Only scan immediate children
        } else {
            self.max_depth
        }
    }

    /// Probe timeout as a `Duration`
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Builder for ScanConfig
#[derive(Debug, Default)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the root directories
    pub fn roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.config.roots = roots;
        self
    }

    /// Add a root directory
    pub fn add_root(mut self, root: PathBuf) -> Self {
        self.config.roots.push(root);
        self
    }

    /// Set the directories to ignore
    pub fn ignore_dirs(mut self, dirs: HashSet<String>) -> Self {
        self.config.ignore_dirs = dirs;
        self
    }

    /// Add a directory to ignore
    pub fn add_ignore_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.ignore_dirs.insert(dir.into());
        self
    }

    /// Set the number of worker threads
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.num_threads = threads;
        self
    }

    /// Set the catalog database path
    pub fn db_path(mut self, path: PathBuf) -> Self {
        self.config.db_path = Some(path);
        self
    }

    /// Set the probe subprocess timeout in seconds
    pub fn probe_timeout_secs(mut self, secs: u64) -> Self {
        self.config.probe_timeout_secs = secs;
        self
    }

    /// Set the number of persistence attempts
    pub fn persist_retries(mut self, retries: u32) -> Self {
        self.config.persist_retries = retries;
        self
    }

    /// Enable or disable recursive scanning
    pub fn recursive(mut self, enabled: bool) -> Self {
        self.config.recursive = enabled;
        self
    }

    /// Set the maximum depth for recursive scanning
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    /// Enable or disable progress output
    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.config.show_progress = enabled;
        self
    }

    /// Build the config
    pub fn build(self) -> ScanConfig {
        self.config
    }
}
