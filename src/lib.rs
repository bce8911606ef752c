//! # JUnit Harness
//!
//! A local-first ingestion pipeline for JUnit XML test reports.
//!
//! JUnit Harness watches a directory tree, parses every report that
//! appears in it, writes suites and test results to SQLite, and keeps a
//! per-folder import status that consumers can follow as a stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────┐   ┌───────────────┐   ┌──────────┐
//! │ PathWatcher  │──▶│  Parser  │──▶│ BatchImporter │──▶│  SQLite  │
//! │ (notify)     │   │ quick-xml│   │ suites+results│   │          │
//! └──────┬───────┘   └──────────┘   └───────┬───────┘   └────▲─────┘
//!        │ WatchEvent                       │ get-or-create  │
//!        ▼                                  ▼                │
//! ┌──────────────┐                  ┌───────────────┐        │
//! │FolderManager │─────────────────▶│  FolderStore  │────────┘
//! │ (snapshots)  │                  │ (cache+table) │
//! └──────────────┘                  └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! jh init                       # create database
//! jh import TEST-foo.xml        # import one report
//! jh scan                       # import everything under the watch root
//! jh watch                      # follow the watch root, print folder JSON
//! jh folders                    # list known folders
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`parser`] | Streaming JUnit XML parser |
//! | [`folder_store`] | SQLite folder store with single-flight creation |
//! | [`importer`] | Batch writer for suites and results |
//! | [`scan`] | One-shot report discovery and import |
//! | [`broadcast`] | Multi-subscriber event fan-out |
//! | [`watcher`] | Background directory watcher |
//! | [`folder_manager`] | Folder snapshot and update stream |
//! | [`harness`] | Component wiring from a config |
//!
//! Models, events, errors and the [`FolderData`](junit_harness_core::store::FolderData)
//! trait live in `junit-harness-core` and are re-exported here.

pub mod broadcast;
pub mod config;
pub mod db;
pub mod folder_manager;
pub mod folder_store;
pub mod harness;
pub mod importer;
pub mod logging;
pub mod migrate;
pub mod parser;
pub mod scan;
pub mod watcher;

pub use junit_harness_core::store::memory::InMemoryFolderData;
pub use junit_harness_core::store::FolderData;
pub use junit_harness_core::{
    FailureInfo, FailureKind, FolderRecord, FolderStatus, FsEventKind, HarnessError,
    ReportedTestElement, ResultStatus, TestResultEntry, TestSuiteEntry, WatchEvent,
};
