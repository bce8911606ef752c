//! Report discovery for one-shot imports.
//!
//! Walks a directory tree and collects every regular file accepted by the
//! configured [`ReportFilter`]. Used by `jh scan`, which imports reports
//! that were already on disk before a watcher was started.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::ReportFilter;
use crate::importer::{import_report, BatchImporter};

/// Outcome of a directory scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub files_imported: usize,
    pub files_failed: usize,
    pub results_written: usize,
}

/// Every report file under `root`, sorted by path.
pub fn discover_reports(root: &Path, filter: &ReportFilter) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Scan root does not exist or is not a directory: {}", root.display());
    }
    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve scan root: {}", root.display()))?;

    let mut files = Vec::new();
    for entry in WalkDir::new(&root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() && filter.is_report(&root, entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Import every report under `root`, continuing past files that fail.
pub async fn scan_and_import(
    root: &Path,
    filter: &ReportFilter,
    importer: &dyn BatchImporter,
) -> Result<ScanSummary> {
    let files = discover_reports(root, filter)?;
    let mut summary = ScanSummary::default();

    for path in &files {
        match import_report(importer, path).await {
            Ok(rows) => {
                summary.files_imported += 1;
                summary.results_written += rows;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, kind = e.kind(), "Import failed");
                summary.files_failed += 1;
            }
        }
    }

    info!(
        root = %root.display(),
        imported = summary.files_imported,
        failed = summary.files_failed,
        results = summary.results_written,
        "Scan complete"
    );
    Ok(summary)
}
