//! Photo Indexer CLI
//!
//! Scans directory trees of photos and videos into a SQLite catalog.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::info;
use std::path::PathBuf;

use photo_indexer::{ScanConfig, Scanner};

const ABOUT: &str = r#"
Photo Indexer - catalog photos and videos into SQLite

Examples:
  photo_indexer scan -r /path/to/photos             scan a single directory
  photo_indexer scan -r /photos -r /videos          scan multiple roots
  photo_indexer scan -r /media --max-depth 5        limit recursion depth
  photo_indexer scan -r /media --no-recursive       scan the root level only
  photo_indexer scan -r /media --json               print the summary as JSON
  photo_indexer scan -r /media -d catalog.db        choose the catalog file
"#;

/// Photo and video catalog indexer
#[derive(Parser)]
#[command(name = "photo_indexer")]
#[command(author, version, about = ABOUT, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan directories for media files
    Scan {
        /// Root directories to scan (repeatable)
        #[arg(short = 'r', long, required = true)]
        roots: Vec<PathBuf>,

        /// Worker threads (0 = auto-detect)
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,

        /// Catalog database file path
        #[arg(short = 'd', long)]
        db: Option<PathBuf>,

        /// Timeout in seconds for each ffprobe/ffmpeg invocation
        #[arg(long, default_value = "30")]
        probe_timeout: u64,

        /// Attempts for a failed catalog transaction
        #[arg(long, default_value = "3")]
        persist_retries: u32,

        /// Do not recurse into subdirectories
        #[arg(long)]
        no_recursive: bool,

        /// Maximum recursion depth
        #[arg(long)]
        max_depth: Option<usize>,

        /// Print the scan summary as JSON
        #[arg(long)]
        json: bool,

        /// Suppress structured progress messages on stderr
        #[arg(long)]
        no_progress: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Scan {
            roots,
            threads,
            db,
            probe_timeout,
            persist_retries,
            no_recursive,
            max_depth,
            json,
            no_progress,
        }) => {
            info!("Starting media scan");
            info!("Roots: {:?}", roots);
            info!(
                "Threads: {}",
                if threads == 0 {
                    "auto".to_string()
                } else {
                    threads.to_string()
                }
            );
            info!("Recursive: {}", !no_recursive);

            let mut builder = ScanConfig::builder()
                .roots(roots)
                .num_threads(threads)
                .probe_timeout_secs(probe_timeout)
                .persist_retries(persist_retries)
                .recursive(!no_recursive)
                .show_progress(!no_progress)
                .db_path(db.unwrap_or_else(|| PathBuf::from("photo_catalog.db")));
            if let Some(depth) = max_depth {
                builder = builder.max_depth(depth);
            }
            let config = builder.build();

            let scanner = Scanner::new(config);
            let summary = match scanner.run() {
                Ok(summary) => summary,
                Err(e) => {
                    eprintln!("scan failed: {}", e);
                    std::process::exit(1);
                }
            };

            if json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(text) => println!("{}", text),
                    Err(e) => {
                        eprintln!("failed to serialize summary: {}", e);
                        std::process::exit(1);
                    }
                }
            } else {
                println!("Scan completed:");
                println!("  Total files: {}", summary.total_files);
                println!("  Total dirs: {}", summary.total_dirs);
                println!("  Images: {}", summary.image_count);
                println!("  Videos: {}", summary.video_count);
                println!("  Audio: {}", summary.audio_count);
                println!("  Persisted: {}", summary.persisted);
                println!("  Failed: {}", summary.failed);
                if summary.cancelled {
                    println!("  Cancelled: yes");
                }
                println!("  Duration: {}ms", summary.duration_ms);
            }
        }
        None => {
            println!("{}", ABOUT);
            println!("Use 'photo_indexer scan --help' for scan options");
        }
    }
}
