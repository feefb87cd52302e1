//! File Sync - Main entry point
//!
//! Mirrors a source directory onto a destination directory, keeping numbered
//! backups of replaced and deleted files.

use anyhow::{Context, Result};
use clap::Parser;
use file_sync::report::{JsonLinesReporter, LogReporter, StatusReporter, TracingDiagnostics};
use file_sync::shutdown::ShutdownCoordinator;
use file_sync::{utils, Config, Settings, SyncError, Synchronizer};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

const EXIT_INVALID_INPUT: u8 = 1;
const EXIT_SETUP_FAILED: u8 = 2;
const EXIT_SYNC_FAILED: u8 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source directory
    #[arg(short, long, value_name = "DIR")]
    source: Option<PathBuf>,

    /// Destination directory (created if missing)
    #[arg(short, long, value_name = "DIR")]
    destination: Option<PathBuf>,

    /// Backup folder, relative to the destination unless absolute
    #[arg(short, long, value_name = "DIR")]
    backup_folder: Option<PathBuf>,

    /// Number of backups kept per file (0 disables backups)
    #[arg(short, long, value_name = "N")]
    num_backups: Option<u32>,

    /// Only synchronize files with this extension (repeatable)
    #[arg(long = "ext", value_name = "EXT")]
    extensions: Vec<String>,

    /// Skip files and directories with this name (repeatable)
    #[arg(long = "skip", value_name = "NAME")]
    skip_names: Vec<String>,

    /// Skip files with this extension (repeatable)
    #[arg(long = "skip-ext", value_name = "EXT")]
    skip_extensions: Vec<String>,

    /// Never delete this destination path (repeatable)
    #[arg(long = "ignore-dest", value_name = "PATH")]
    ignore_destination: Vec<String>,

    /// Report what would change without touching the destination
    #[arg(short, long)]
    info_only: bool,

    /// Compare files by content checksum
    #[arg(short, long)]
    calc_checksum: bool,

    /// Mirror directories that hold no files
    #[arg(long)]
    empty_directories: bool,

    /// Path to configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit events as JSON lines on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_INVALID_INPUT)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // Load configuration
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(EXIT_INVALID_INPUT);
        }
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    if let Err(e) = utils::logger::init(log_level) {
        eprintln!("Error: failed to initialize logging: {:#}", e);
        return ExitCode::from(EXIT_INVALID_INPUT);
    }

    let settings = merge_settings(config.sync, &args);
    if let Err(e) = settings.validate() {
        tracing::error!("{}", e);
        return ExitCode::from(EXIT_INVALID_INPUT);
    }

    tracing::info!("Starting file-sync v{}", env!("CARGO_PKG_VERSION"));

    if !settings.info_mode && !settings.destination_root.exists() {
        if let Err(e) = std::fs::create_dir_all(&settings.destination_root) {
            tracing::error!(
                "Failed to create destination {}: {}",
                settings.destination_root.display(),
                e
            );
            return ExitCode::from(EXIT_SETUP_FAILED);
        }
        tracing::info!(
            "Created destination {}",
            settings.destination_root.display()
        );
    }

    let reporter: Arc<dyn StatusReporter> = if args.json {
        Arc::new(JsonLinesReporter)
    } else {
        Arc::new(LogReporter)
    };

    // Create shutdown coordinator
    let shutdown_coordinator = ShutdownCoordinator::new();
    let signal_coordinator = shutdown_coordinator.clone();
    let signal_handle = tokio::spawn(async move {
        signal_coordinator.wait_for_signal().await;
    });

    let mut synchronizer = Synchronizer::with_cancel(
        settings,
        reporter,
        Arc::new(TracingDiagnostics),
        shutdown_coordinator.token(),
    );

    let code = match synchronizer.setup_synchronisation_data().await {
        Err(e) => {
            tracing::error!("Setup failed: {}", e);
            ExitCode::from(EXIT_SETUP_FAILED)
        }
        Ok(()) => {
            let result = tokio::task::spawn_blocking(move || synchronizer.sync_destination()).await;
            match result {
                Ok(Ok(_summary)) => ExitCode::SUCCESS,
                Ok(Err(e @ SyncError::Cancelled { .. })) => {
                    tracing::warn!("{}", e);
                    ExitCode::from(EXIT_SYNC_FAILED)
                }
                Ok(Err(e)) => {
                    tracing::error!("Synchronization failed: {}", e);
                    ExitCode::from(EXIT_SYNC_FAILED)
                }
                Err(e) => {
                    tracing::error!("Synchronization task panicked: {}", e);
                    ExitCode::from(EXIT_SYNC_FAILED)
                }
            }
        }
    };

    // Stop listening for signals
    shutdown_coordinator.trigger();
    let _ = signal_handle.await;

    code
}

fn load_config(args: &Args) -> Result<Config> {
    match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(Config::default()),
    }
}

/// Scalar flags replace file values; set-valued flags extend them.
fn merge_settings(mut settings: Settings, args: &Args) -> Settings {
    if let Some(source) = args.source.clone() {
        settings.source_root = source;
    }
    if let Some(destination) = args.destination.clone() {
        settings.destination_root = destination;
    }
    if let Some(backup_folder) = args.backup_folder.clone() {
        settings.backup_folder = backup_folder;
    }
    if let Some(num_backups) = args.num_backups {
        settings.num_backups = num_backups;
    }

    settings
        .extensions_to_include
        .extend(args.extensions.iter().cloned());
    settings
        .names_to_skip
        .extend(args.skip_names.iter().cloned());
    settings
        .extensions_to_skip
        .extend(args.skip_extensions.iter().cloned());
    settings
        .destination_paths_to_ignore
        .extend(args.ignore_destination.iter().cloned());

    settings.info_mode |= args.info_only;
    settings.calc_checksum |= args.calc_checksum;
    settings.create_empty_directories |= args.empty_directories;

    settings
}
