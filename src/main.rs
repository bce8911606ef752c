//! # JUnit Harness CLI (`jh`)
//!
//! ## Usage
//!
//! ```bash
//! jh --config ./config/jh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `jh init` | Create the SQLite database and schema |
//! | `jh import <file>` | Parse and import one report |
//! | `jh scan [dir]` | Import every report under a directory (default: watch root) |
//! | `jh watch` | Watch the root and print folder updates as JSON lines |
//! | `jh folders` | Print every known folder as a JSON line |

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use junit_harness::config;
use junit_harness::harness::Harness;
use junit_harness::importer::import_report;
use junit_harness::logging;
use junit_harness::migrate;
use junit_harness::scan;
use junit_harness::FolderData;

/// JUnit Harness: watch a folder tree and import JUnit XML reports into
/// SQLite.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/jh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "jh",
    about = "JUnit Harness: a local-first JUnit report ingestion pipeline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/jh.toml")]
    config: PathBuf,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Parse and import a single report file.
    Import {
        /// Path to a JUnit XML report.
        file: PathBuf,
    },

    /// Import every report found under a directory.
    ///
    /// Files are selected with the configured include/exclude globs.
    /// Failing files are logged and counted; the scan continues.
    Scan {
        /// Directory to scan. Defaults to the configured watch root.
        dir: Option<PathBuf>,
    },

    /// Watch the configured root and import new reports as they appear.
    ///
    /// Prints the current folder snapshot, then one JSON line per folder
    /// update, until interrupted with Ctrl-C.
    Watch,

    /// List every known folder as JSON lines.
    Folders,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging, cli.verbose)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            let harness = Harness::open(&cfg).await?;
            let rows = import_report(harness.importer.as_ref(), &file)
                .await
                .with_context(|| format!("Failed to import {}", file.display()))?;
            println!("Imported {} test results from {}", rows, file.display());
            harness.close().await;
        }
        Commands::Scan { dir } => {
            let harness = Harness::open(&cfg).await?;
            let dir = dir.unwrap_or_else(|| cfg.watch.root.clone());
            let filter = cfg.watch.report_filter()?;
            let summary = scan::scan_and_import(&dir, &filter, harness.importer.as_ref()).await?;
            println!(
                "Imported {} files ({} test results), {} failed",
                summary.files_imported, summary.results_written, summary.files_failed
            );
            harness.close().await;
        }
        Commands::Watch => {
            let harness = Harness::open(&cfg).await?;
            let manager = harness.start_folder_manager(&cfg)?;
            let mut folders = manager.folder_event_stream().await?;

            loop {
                tokio::select! {
                    folder = folders.recv() => match folder {
                        Some(folder) => println!("{}", folder.to_json()),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("Shutting down...");
                        break;
                    }
                }
            }

            manager.shut_down();
            harness.close().await;
        }
        Commands::Folders => {
            let harness = Harness::open(&cfg).await?;
            for folder in harness.folders.all_folders().await? {
                println!("{}", folder.to_json());
            }
            harness.close().await;
        }
    }

    Ok(())
}
