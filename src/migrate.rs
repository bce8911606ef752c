//! Database schema migrations (idempotent).
//!
//! Column names follow the persisted schema consumed by the query and
//! presentation layers exactly (`createdOn`, `folder_id`, `suite_id`, ...).
//! Timestamps are epoch milliseconds.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes on an open pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Create folder table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS folder (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            createdOn INTEGER NOT NULL,
            updatedOn INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create testSuite table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS testSuite (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT NOT NULL UNIQUE,
            packageName TEXT NOT NULL,
            className TEXT NOT NULL,
            time TEXT NOT NULL,
            folder TEXT NOT NULL,
            file TEXT NOT NULL,
            tests INTEGER NOT NULL,
            failures INTEGER NOT NULL,
            errors INTEGER NOT NULL,
            skipped INTEGER NOT NULL DEFAULT 0,
            timestamp INTEGER NOT NULL,
            folder_id INTEGER NOT NULL,
            FOREIGN KEY (folder_id) REFERENCES folder(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create testEntry table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS testEntry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT NOT NULL UNIQUE,
            className TEXT NOT NULL,
            methodName TEXT NOT NULL,
            time TEXT NOT NULL,
            status TEXT NOT NULL,
            failException TEXT,
            failMessage TEXT,
            failDetail TEXT,
            suite_id INTEGER NOT NULL,
            FOREIGN KEY (suite_id) REFERENCES testSuite(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_testSuite_folder_id ON testSuite(folder_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_testEntry_suite_id ON testEntry(suite_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_testSuite_timestamp ON testSuite(timestamp DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
