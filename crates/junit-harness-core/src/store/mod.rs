//! Folder storage abstraction for JUnit Harness.
//!
//! The [`FolderData`] trait is the single source of truth for
//! [`FolderRecord`]s. The SQLite-backed, cache-fronted implementation lives
//! in the `junit-harness` crate; [`memory::InMemoryFolderData`] serves tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::path::Path;

use async_trait::async_trait;

use crate::error::{HarnessError, Result};
use crate::models::FolderRecord;

/// Abstract folder store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_folder`](FolderData::get_folder) | Look up a folder, optionally creating it |
/// | [`find_folder`](FolderData::find_folder) | Look up a folder that must exist |
/// | [`create_folder`](FolderData::create_folder) | Insert a folder, tolerating a concurrent creator |
/// | [`update_folder`](FolderData::update_folder) | Persist status/path changes |
/// | [`all_folders`](FolderData::all_folders) | Bulk load every known folder |
///
/// # Concurrency
///
/// Any number of concurrent `get_folder(path, true)` calls for the same
/// unknown path must converge on one stored record and all return its id.
#[async_trait]
pub trait FolderData: Send + Sync {
    /// Return the folder stored for `path`.
    ///
    /// With `create_if_absent` a missing folder is created; without it a
    /// miss is [`HarnessError::NotFound`].
    async fn get_folder(&self, path: &Path, create_if_absent: bool) -> Result<FolderRecord>;

    /// Insert a folder with status `Active`.
    ///
    /// Losing a creation race to another writer is not an error: the
    /// already-stored record is returned instead.
    async fn create_folder(&self, path: &Path) -> Result<FolderRecord>;

    /// Persist the status and path of a stored folder.
    ///
    /// Returns the record with a refreshed, strictly later `updated` time.
    async fn update_folder(&self, folder: &FolderRecord) -> Result<FolderRecord>;

    /// Every folder currently in storage.
    async fn all_folders(&self) -> Result<Vec<FolderRecord>>;

    async fn find_folder(&self, path: &Path) -> Result<FolderRecord> {
        self.get_folder(path, false).await
    }
}

/// Reject paths the store must never key on.
pub fn check_folder_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(HarnessError::invalid_argument("folder path must not be empty"));
    }
    if !path.is_absolute() {
        return Err(HarnessError::invalid_argument(format!(
            "folder path must be absolute: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Reject records that were never persisted.
pub fn stored_id(folder: &FolderRecord) -> Result<i64> {
    folder.id.ok_or_else(|| {
        HarnessError::invalid_argument(format!(
            "folder {} has no id; it was never stored",
            folder.path.display()
        ))
    })
}
