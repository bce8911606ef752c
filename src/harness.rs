//! Wiring of the pipeline components from a [`Config`].
//!
//! [`Harness::open`] connects to the database, makes sure the schema
//! exists, and builds the shared folder store and batch importer that the
//! CLI commands and the watcher use.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use junit_harness_core::store::FolderData;

use crate::config::Config;
use crate::folder_manager::FolderManager;
use crate::folder_store::SqliteFolderData;
use crate::importer::SqliteBatchImporter;
use crate::watcher::{PathWatcher, WatchOptions};
use crate::{db, migrate};

pub struct Harness {
    pub pool: SqlitePool,
    pub folders: Arc<SqliteFolderData>,
    pub importer: Arc<SqliteBatchImporter>,
}

impl Harness {
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;

        let folders = Arc::new(SqliteFolderData::new(pool.clone()));
        let importer = SqliteBatchImporter::new(
            pool.clone(),
            Arc::clone(&folders) as Arc<dyn FolderData>,
            config.watch.batch_size,
        )?;

        Ok(Self {
            pool,
            folders,
            importer: Arc::new(importer),
        })
    }

    /// A watcher over the configured root, not yet started.
    pub fn watcher(&self, config: &Config) -> Result<PathWatcher> {
        let options = WatchOptions::from_config(&config.watch)?;
        let watcher = PathWatcher::new(&config.watch.root, self.importer.clone(), options)
            .with_context(|| {
                format!("Failed to set up watcher for {}", config.watch.root.display())
            })?;
        Ok(watcher)
    }

    /// Start a watcher and wrap it in a [`FolderManager`].
    ///
    /// Must be called within a tokio runtime.
    pub fn start_folder_manager(&self, config: &Config) -> Result<FolderManager> {
        let watcher = Arc::new(self.watcher(config)?);
        watcher.start().context("Failed to start watcher")?;
        Ok(FolderManager::new(watcher, self.folders.clone()))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
