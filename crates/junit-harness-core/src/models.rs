//! Core data models used throughout JUnit Harness.
//!
//! [`FolderRecord`] is the persisted view of a directory under the watch
//! root. [`ReportedTestElement`] is what the report parser hands to the
//! batch importer: one [`TestSuiteEntry`] followed by the
//! [`TestResultEntry`] items it owns.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle status of a tracked folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FolderStatus {
    Active,
    ActiveWithErrors,
    Importing,
}

impl FolderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderStatus::Active => "Active",
            FolderStatus::ActiveWithErrors => "ActiveWithErrors",
            FolderStatus::Importing => "Importing",
        }
    }

    /// Parse the stored column value. Returns `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Active" => Some(FolderStatus::Active),
            "ActiveWithErrors" => Some(FolderStatus::ActiveWithErrors),
            "Importing" => Some(FolderStatus::Importing),
            _ => None,
        }
    }
}

impl fmt::Display for FolderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directory under the watch root, tracked with an import status.
///
/// `id` is `None` until the record has been persisted. Timestamps carry
/// millisecond precision so that a record read back from storage compares
/// equal to the one that was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderRecord {
    pub id: Option<i64>,
    pub path: PathBuf,
    pub status: FolderStatus,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl FolderRecord {
    /// A not-yet-persisted record with status [`FolderStatus::Active`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let now = now_millis();
        Self {
            id: None,
            path: path.into(),
            status: FolderStatus::Active,
            created: now,
            updated: now,
        }
    }

    /// Copy of this record with a different status. `updated` is left alone;
    /// the store refreshes it when the change is persisted.
    pub fn with_status(&self, status: FolderStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    pub fn with_updated(&self, updated: DateTime<Utc>) -> Self {
        Self {
            updated,
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// Current time truncated to whole milliseconds.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Timestamp for the next change of a record last touched at `previous`.
///
/// Always strictly later than `previous`, even when two changes land in the
/// same millisecond.
pub fn next_update_time(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_millis();
    let floor = previous + Duration::milliseconds(1);
    if now > previous {
        now
    } else {
        floor
    }
}

/// Split `com.foo.BarTest` into (`com.foo`, `BarTest`).
///
/// A name without a dot has an empty package.
pub fn split_qualified_name(qualified_name: &str) -> (&str, &str) {
    match qualified_name.rfind('.') {
        Some(idx) => (&qualified_name[..idx], &qualified_name[idx + 1..]),
        None => ("", qualified_name),
    }
}

/// One element of the entity stream produced from a report file.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportedTestElement {
    Suite(TestSuiteEntry),
    Result(TestResultEntry),
}

impl ReportedTestElement {
    pub fn storage_id(&self) -> Uuid {
        match self {
            ReportedTestElement::Suite(s) => s.storage_id,
            ReportedTestElement::Result(r) => r.storage_id,
        }
    }

    pub fn as_suite(&self) -> Option<&TestSuiteEntry> {
        match self {
            ReportedTestElement::Suite(s) => Some(s),
            ReportedTestElement::Result(_) => None,
        }
    }

    pub fn as_result(&self) -> Option<&TestResultEntry> {
        match self {
            ReportedTestElement::Result(r) => Some(r),
            ReportedTestElement::Suite(_) => None,
        }
    }
}

/// A `<testsuite>` element together with the file it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSuiteEntry {
    pub storage_id: Uuid,
    pub qualified_name: String,
    /// Value of the `time` attribute, kept verbatim.
    pub time: String,
    /// File name of the report, without directories.
    pub containing_file: String,
    /// Absolute path of the folder holding the report.
    pub containing_folder: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub tests_run: i64,
    pub total_errors: i64,
    pub total_failures: i64,
    pub total_skipped: i64,
}

impl TestSuiteEntry {
    pub fn package_name(&self) -> &str {
        split_qualified_name(&self.qualified_name).0
    }

    pub fn local_name(&self) -> &str {
        split_qualified_name(&self.qualified_name).1
    }
}

/// Outcome of a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResultStatus {
    Pass,
    Fail,
    Error,
    Skipped,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Pass => "Pass",
            ResultStatus::Fail => "Fail",
            ResultStatus::Error => "Error",
            ResultStatus::Skipped => "Skipped",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which child element reported the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    Failure,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureInfo {
    pub message: Option<String>,
    /// The `type` attribute, usually an exception class name.
    pub exception_name: Option<String>,
    /// Element text, typically a stack trace.
    pub details: String,
    pub kind: FailureKind,
}

/// A `<testcase>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResultEntry {
    pub storage_id: Uuid,
    pub qualified_name: String,
    pub method_name: String,
    pub time: String,
    pub failure: Option<FailureInfo>,
    pub skipped: bool,
}

impl TestResultEntry {
    /// Failure beats error, error beats skipped, anything else passed.
    pub fn status(&self) -> ResultStatus {
        match &self.failure {
            Some(info) if info.kind == FailureKind::Failure => ResultStatus::Fail,
            Some(_) => ResultStatus::Error,
            None if self.skipped => ResultStatus::Skipped,
            None => ResultStatus::Pass,
        }
    }

    pub fn package_name(&self) -> &str {
        split_qualified_name(&self.qualified_name).0
    }

    pub fn local_name(&self) -> &str {
        split_qualified_name(&self.qualified_name).1
    }
}
