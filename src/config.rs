//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/jh.sqlite"
//!
//! [watch]
//! root = "./reports"
//! batch_size = 1000
//! import_workers = 4
//!
//! [logging]
//! filter = "junit_harness=info"
//! ```
//!
//! See [`load_config`] for the validation rules.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub watch: WatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    /// Top-level directory monitored recursively for new reports.
    pub root: PathBuf,
    /// Result rows written per batch flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upper bound on concurrently running parse + import tasks.
    #[serde(default = "default_import_workers")]
    pub import_workers: usize,
    /// How often the watch loop wakes to check for a stop request.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Quiet period a new report must go without further writes before it
    /// is imported.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_batch_size() -> usize {
    1000
}
fn default_import_workers() -> usize {
    4
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_settle_ms() -> u64 {
    500
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

impl WatchConfig {
    /// Watch settings for `root` with every other field at its default.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            batch_size: default_batch_size(),
            import_workers: default_import_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_ms: default_settle_ms(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }

    /// Compile the include/exclude globs into a [`ReportFilter`].
    pub fn report_filter(&self) -> Result<ReportFilter> {
        Ok(ReportFilter {
            include: build_globset(&self.include_globs)?,
            exclude: build_globset(&self.exclude_globs)?,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "junit_harness=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// Decides which files under the watch root are treated as reports.
///
/// Patterns match against the path relative to the root.
#[derive(Debug, Clone)]
pub struct ReportFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl ReportFilter {
    /// Matches every file.
    pub fn accept_all() -> Self {
        Self {
            include: build_globset(&default_include_globs()).unwrap_or_else(|_| GlobSet::empty()),
            exclude: GlobSet::empty(),
        }
    }

    pub fn is_report(&self, root: &Path, path: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();
        !self.exclude.is_match(rel_str.as_ref()) && self.include.is_match(rel_str.as_ref())
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.watch.batch_size == 0 {
        anyhow::bail!("watch.batch_size must be > 0");
    }

    if config.watch.import_workers == 0 {
        anyhow::bail!("watch.import_workers must be > 0");
    }

    if config.watch.poll_interval_ms == 0 {
        anyhow::bail!("watch.poll_interval_ms must be > 0");
    }

    if config.watch.settle_ms == 0 {
        anyhow::bail!("watch.settle_ms must be > 0");
    }

    if config.watch.root.as_os_str().is_empty() {
        anyhow::bail!("watch.root must not be empty");
    }

    config.watch.report_filter()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse(
            r#"
            [db]
            path = "/tmp/jh.sqlite"

            [watch]
            root = "/tmp/reports"
            "#,
        )
        .unwrap();
        assert_eq!(config.watch.batch_size, 1000);
        assert_eq!(config.watch.import_workers, 4);
        assert_eq!(config.watch.poll_interval_ms, 100);
        assert_eq!(config.watch.settle_ms, 500);
        assert_eq!(config.logging.filter, "junit_harness=info");
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = parse(
            r#"
            [db]
            path = "/tmp/jh.sqlite"

            [watch]
            root = "/tmp/reports"
            batch_size = 0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_zero_settle_rejected() {
        let err = parse(
            r#"
            [db]
            path = "/tmp/jh.sqlite"

            [watch]
            root = "/tmp/reports"
            settle_ms = 0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("settle_ms"));
    }

    #[test]
    fn test_bad_glob_rejected() {
        let err = parse(
            r#"
            [db]
            path = "/tmp/jh.sqlite"

            [watch]
            root = "/tmp/reports"
            include_globs = ["a[b"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Invalid glob"));
    }

    #[test]
    fn test_report_filter_relative_to_root() {
        let mut watch = WatchConfig::for_root("/reports");
        watch.include_globs = vec!["**/TEST-*.xml".to_string()];
        watch.exclude_globs = vec!["**/tmp/**".to_string()];
        let filter = watch.report_filter().unwrap();

        let root = Path::new("/reports");
        assert!(filter.is_report(root, Path::new("/reports/nightly/TEST-a.xml")));
        assert!(filter.is_report(root, Path::new("/reports/TEST-a.xml")));
        assert!(!filter.is_report(root, Path::new("/reports/nightly/notes.txt")));
        assert!(!filter.is_report(root, Path::new("/reports/tmp/TEST-a.xml")));
    }

    #[test]
    fn test_accept_all_filter() {
        let filter = ReportFilter::accept_all();
        assert!(filter.is_report(Path::new("/r"), Path::new("/r/anything.bin")));
    }
}
