//! # JUnit Harness Core
//!
//! Shared, runtime-free logic for JUnit Harness: report and folder models,
//! the import lifecycle event model, the error taxonomy, and the folder
//! store abstraction.
//!
//! This crate contains no tokio, sqlx, filesystem watching, or other
//! native-only dependencies. The SQLite-backed store, the report parser,
//! and the watcher live in the `junit-harness` crate.

pub mod error;
pub mod events;
pub mod models;
pub mod store;

pub use error::{HarnessError, Result};
pub use events::{FsEventKind, WatchEvent};
pub use models::{
    FailureInfo, FailureKind, FolderRecord, FolderStatus, ReportedTestElement, ResultStatus,
    TestResultEntry, TestSuiteEntry,
};
