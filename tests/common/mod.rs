#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use junit_harness::folder_store::SqliteFolderData;
use junit_harness::importer::SqliteBatchImporter;
use junit_harness::{db, migrate};

pub const ALL_TESTS: &str = include_str!("../fixtures/TEST-testdata.AllTests.xml");
pub const MULTI: &str = include_str!("../fixtures/TEST-multi.xml");
pub const MALFORMED: &str = include_str!("../fixtures/TEST-malformed.xml");

pub struct TestDb {
    pub tmp: TempDir,
    pub pool: SqlitePool,
    pub folders: Arc<SqliteFolderData>,
}

pub async fn test_db() -> TestDb {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("data/jh.sqlite"))
        .await
        .unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    let folders = Arc::new(SqliteFolderData::new(pool.clone()));
    TestDb { tmp, pool, folders }
}

impl TestDb {
    pub fn importer(&self, batch_size: usize) -> Arc<SqliteBatchImporter> {
        Arc::new(SqliteBatchImporter::new(self.pool.clone(), self.folders.clone(), batch_size).unwrap())
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

/// Write a report into `staging`, then move it to `dest` so the watcher
/// never sees a half-written file.
pub fn drop_report(staging: &Path, dest: &Path, content: &str) {
    let name = dest.file_name().unwrap();
    let staged = staging.join(name);
    fs::write(&staged, content).unwrap();
    fs::rename(&staged, dest).unwrap();
}

/// A copy of the AllTests fixture with a distinct suite name.
pub fn report_named(suite: &str) -> String {
    ALL_TESTS.replace("name=\"testdata.AllTests\"", &format!("name=\"{}\"", suite))
}

pub async fn recv_within<T>(rx: &mut UnboundedReceiver<T>, secs: u64) -> Option<T> {
    tokio::time::timeout(Duration::from_secs(secs), rx.recv())
        .await
        .ok()
        .flatten()
}

pub fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap()
}
