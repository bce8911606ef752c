//! Batch persistence of parsed report entities.
//!
//! The importer consumes the parser's entity stream in order. Each
//! [`TestSuiteEntry`] resolves (or creates) its folder, is inserted on its
//! own, and its generated id becomes the parent of every
//! [`TestResultEntry`] that follows until the next suite. Result rows are
//! buffered and written `batch_size` at a time inside one transaction.
//!
//! A zero-row write or a suite insert that yields no id aborts the import
//! with [`HarnessError::Storage`]. Rows already flushed stay written.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use junit_harness_core::store::FolderData;
use junit_harness_core::{
    HarnessError, ReportedTestElement, Result, TestResultEntry, TestSuiteEntry,
};

use crate::db::storage_error;
use crate::parser::parse_report;

/// Writes one report's entities to storage.
#[async_trait]
pub trait BatchImporter: Send + Sync {
    /// Persist `elements` in order and return the number of result rows written.
    async fn import(&self, elements: Vec<ReportedTestElement>) -> Result<usize>;
}

/// Parse the report at `path` on the blocking pool, then import it.
///
/// Returns the number of result rows written.
pub async fn import_report(importer: &dyn BatchImporter, path: &Path) -> Result<usize> {
    let owned = path.to_path_buf();
    let elements = tokio::task::spawn_blocking(move || parse_report(&owned))
        .await
        .map_err(|e| HarnessError::parse(path, format!("parser task failed: {}", e)))??;
    importer.import(elements).await
}

/// A result row waiting for the next flush, tagged with its suite's id.
struct PendingResult {
    suite_id: i64,
    entry: TestResultEntry,
}

pub struct SqliteBatchImporter {
    pool: SqlitePool,
    folders: Arc<dyn FolderData>,
    batch_size: usize,
}

impl SqliteBatchImporter {
    pub fn new(pool: SqlitePool, folders: Arc<dyn FolderData>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(HarnessError::invalid_argument("batch size must be > 0"));
        }
        Ok(Self {
            pool,
            folders,
            batch_size,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn insert_suite(&self, suite: &TestSuiteEntry) -> Result<i64> {
        let folder = self
            .folders
            .get_folder(&suite.containing_folder, true)
            .await?;
        let folder_id = folder.id.ok_or_else(|| {
            HarnessError::storage(format!(
                "folder {} has no id after get-or-create",
                folder.path.display()
            ))
        })?;

        let suite_id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO testSuite
                (uuid, packageName, className, time, folder, file,
                 tests, failures, errors, skipped, timestamp, folder_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(suite.storage_id.to_string())
        .bind(suite.package_name())
        .bind(suite.local_name())
        .bind(&suite.time)
        .bind(suite.containing_folder.to_string_lossy().into_owned())
        .bind(&suite.containing_file)
        .bind(suite.tests_run)
        .bind(suite.total_failures)
        .bind(suite.total_errors)
        .bind(suite.total_skipped)
        .bind(suite.timestamp.timestamp_millis())
        .bind(folder_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error(format!("inserting suite {}", suite.qualified_name), e))?;

        suite_id.ok_or_else(|| {
            HarnessError::storage(format!(
                "inserting suite {} returned no generated key",
                suite.qualified_name
            ))
        })
    }

    async fn flush(&self, batch: &mut Vec<PendingResult>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("starting result batch", e))?;

        for pending in batch.iter() {
            let entry = &pending.entry;
            let failure = entry.failure.as_ref();
            let result = sqlx::query(
                r#"
                INSERT INTO testEntry
                    (uuid, className, methodName, time, status,
                     failException, failMessage, failDetail, suite_id)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entry.storage_id.to_string())
            .bind(&entry.qualified_name)
            .bind(&entry.method_name)
            .bind(&entry.time)
            .bind(entry.status().as_str())
            .bind(failure.and_then(|f| f.exception_name.as_deref()))
            .bind(failure.and_then(|f| f.message.as_deref()))
            .bind(failure.map(|f| f.details.as_str()))
            .bind(pending.suite_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                storage_error(
                    format!(
                        "inserting result {}.{}",
                        entry.qualified_name, entry.method_name
                    ),
                    e,
                )
            })?;

            if result.rows_affected() == 0 {
                return Err(HarnessError::storage(format!(
                    "inserting result {}.{} affected no rows",
                    entry.qualified_name, entry.method_name
                )));
            }
        }

        tx.commit()
            .await
            .map_err(|e| storage_error("committing result batch", e))?;

        let written = batch.len();
        debug!(rows = written, "Flushed result batch");
        batch.clear();
        Ok(written)
    }
}

#[async_trait]
impl BatchImporter for SqliteBatchImporter {
    async fn import(&self, elements: Vec<ReportedTestElement>) -> Result<usize> {
        let mut batch: Vec<PendingResult> = Vec::with_capacity(self.batch_size.min(1024));
        let mut current_suite: Option<i64> = None;
        let mut written = 0usize;

        for element in elements {
            match element {
                ReportedTestElement::Suite(suite) => {
                    current_suite = Some(self.insert_suite(&suite).await?);
                }
                ReportedTestElement::Result(entry) => {
                    let suite_id = current_suite.ok_or_else(|| {
                        HarnessError::invalid_argument(format!(
                            "result {}.{} has no preceding suite",
                            entry.qualified_name, entry.method_name
                        ))
                    })?;
                    batch.push(PendingResult { suite_id, entry });
                    if batch.len() >= self.batch_size {
                        written += self.flush(&mut batch).await?;
                    }
                }
            }
        }

        written += self.flush(&mut batch).await?;
        Ok(written)
    }
}
