//! SQLite-backed, cache-fronted folder store.
//!
//! Reads are served from an in-process cache keyed by absolute path. A miss
//! falls through to the `folder` table. Creation runs under one async mutex:
//! re-check the cache, re-check the table, insert, read back. Concurrent
//! `get_folder(path, true)` calls for an unknown path therefore collapse
//! into a single insert, and a unique-constraint collision with a writer
//! outside this process is treated as success.
//!
//! The cache is only filled or invalidated while that mutex is held, so a
//! row read before an update can never be cached after the update has
//! invalidated it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info};

use junit_harness_core::models::next_update_time;
use junit_harness_core::store::{check_folder_path, stored_id, FolderData};
use junit_harness_core::{FolderRecord, FolderStatus, HarnessError, Result};

use crate::db::storage_error;

pub struct SqliteFolderData {
    pool: SqlitePool,
    cache: RwLock<HashMap<PathBuf, FolderRecord>>,
    write_lock: Mutex<()>,
}

impl SqliteFolderData {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Number of records currently cached.
    pub fn cached_len(&self) -> usize {
        self.read_cache().len()
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, HashMap<PathBuf, FolderRecord>> {
        self.cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, HashMap<PathBuf, FolderRecord>> {
        self.cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cached(&self, path: &Path) -> Option<FolderRecord> {
        self.read_cache().get(path).cloned()
    }

    fn remember(&self, folder: &FolderRecord) {
        self.write_cache()
            .insert(folder.path.clone(), folder.clone());
    }

    async fn load(&self, path: &Path) -> Result<Option<FolderRecord>> {
        let row = sqlx::query(
            "SELECT id, path, status, createdOn, updatedOn FROM folder WHERE path = ?",
        )
        .bind(path_text(path))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error(format!("loading folder {}", path.display()), e))?;

        row.as_ref().map(folder_from_row).transpose()
    }

    /// Cache hit, or a stored row that is then cached.
    async fn lookup(&self, path: &Path) -> Result<Option<FolderRecord>> {
        if let Some(folder) = self.cached(path) {
            return Ok(Some(folder));
        }
        let _guard = self.write_lock.lock().await;
        self.lookup_locked(path).await
    }

    /// [`lookup`](Self::lookup) for callers already holding `write_lock`.
    async fn lookup_locked(&self, path: &Path) -> Result<Option<FolderRecord>> {
        if let Some(folder) = self.cached(path) {
            return Ok(Some(folder));
        }
        let loaded = self.load(path).await?;
        if let Some(folder) = &loaded {
            self.remember(folder);
        }
        Ok(loaded)
    }
}

#[async_trait]
impl FolderData for SqliteFolderData {
    async fn get_folder(&self, path: &Path, create_if_absent: bool) -> Result<FolderRecord> {
        check_folder_path(path)?;
        match self.lookup(path).await? {
            Some(folder) => Ok(folder),
            None if create_if_absent => self.create_folder(path).await,
            None => Err(HarnessError::NotFound(path.to_path_buf())),
        }
    }

    async fn create_folder(&self, path: &Path) -> Result<FolderRecord> {
        check_folder_path(path)?;
        let _guard = self.write_lock.lock().await;

        // Another caller may have finished creating it while we waited.
        if let Some(folder) = self.lookup_locked(path).await? {
            return Ok(folder);
        }

        let fresh = FolderRecord::new(path);
        let inserted = sqlx::query(
            "INSERT INTO folder (path, status, createdOn, updatedOn) VALUES (?, ?, ?, ?)",
        )
        .bind(path_text(path))
        .bind(fresh.status.as_str())
        .bind(fresh.created.timestamp_millis())
        .bind(fresh.updated.timestamp_millis())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => info!(path = %path.display(), "Created folder"),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                debug!(path = %path.display(), "Folder already stored by another writer");
            }
            Err(e) => {
                return Err(storage_error(
                    format!("inserting folder {}", path.display()),
                    e,
                ))
            }
        }

        let stored = self.load(path).await?.ok_or_else(|| {
            HarnessError::storage(format!(
                "folder {} missing after insert",
                path.display()
            ))
        })?;
        self.remember(&stored);
        Ok(stored)
    }

    async fn update_folder(&self, folder: &FolderRecord) -> Result<FolderRecord> {
        let id = stored_id(folder)?;
        check_folder_path(&folder.path)?;
        let _guard = self.write_lock.lock().await;

        let previous: Option<i64> = sqlx::query_scalar("SELECT updatedOn FROM folder WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error(format!("reading folder {}", id), e))?;
        let previous = previous
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map_or(folder.updated, |p| p.max(folder.updated));
        let updated = folder.with_updated(next_update_time(previous));

        let result = sqlx::query("UPDATE folder SET path = ?, status = ?, updatedOn = ? WHERE id = ?")
            .bind(path_text(&updated.path))
            .bind(updated.status.as_str())
            .bind(updated.updated.timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error(format!("updating folder {}", id), e))?;

        if result.rows_affected() == 0 {
            return Err(HarnessError::storage(format!(
                "updating folder {} ({}) affected no rows",
                id,
                updated.path.display()
            )));
        }

        let mut cache = self.write_cache();
        cache.remove(&updated.path);
        cache.retain(|_, cached| cached.id != Some(id));

        debug!(
            path = %updated.path.display(),
            status = %updated.status,
            "Updated folder"
        );
        Ok(updated)
    }

    async fn all_folders(&self) -> Result<Vec<FolderRecord>> {
        let _guard = self.write_lock.lock().await;
        let rows = sqlx::query(
            "SELECT id, path, status, createdOn, updatedOn FROM folder ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("loading all folders", e))?;

        let folders = rows
            .iter()
            .map(folder_from_row)
            .collect::<Result<Vec<_>>>()?;

        let mut cache = self.write_cache();
        for folder in &folders {
            cache.insert(folder.path.clone(), folder.clone());
        }
        Ok(folders)
    }
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn folder_from_row(row: &SqliteRow) -> Result<FolderRecord> {
    let column = |e: sqlx::Error| storage_error("decoding folder row", e);

    let id: i64 = row.try_get("id").map_err(column)?;
    let path: String = row.try_get("path").map_err(column)?;
    let status: String = row.try_get("status").map_err(column)?;
    let created: i64 = row.try_get("createdOn").map_err(column)?;
    let updated: i64 = row.try_get("updatedOn").map_err(column)?;

    let status = FolderStatus::from_name(&status).ok_or_else(|| {
        HarnessError::storage(format!("folder {} has unknown status '{}'", id, status))
    })?;

    Ok(FolderRecord {
        id: Some(id),
        path: PathBuf::from(path),
        status,
        created: millis(id, created)?,
        updated: millis(id, updated)?,
    })
}

fn millis(id: i64, value: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value).ok_or_else(|| {
        HarnessError::storage(format!("folder {} has out-of-range timestamp {}", id, value))
    })
}
