//! In-memory [`FolderData`] implementation for testing.
//!
//! Records live in a `HashMap` behind one `std::sync::Mutex`, so every
//! get-or-create is a single critical section.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{HarnessError, Result};
use crate::models::{next_update_time, FolderRecord};

use super::{check_folder_path, stored_id, FolderData};

#[derive(Default)]
struct Inner {
    next_id: i64,
    by_path: HashMap<PathBuf, FolderRecord>,
}

/// In-memory folder store.
#[derive(Default)]
pub struct InMemoryFolderData {
    inner: Mutex<Inner>,
}

impl InMemoryFolderData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn insert_locked(inner: &mut Inner, path: &Path) -> FolderRecord {
    if let Some(existing) = inner.by_path.get(path) {
        return existing.clone();
    }
    inner.next_id += 1;
    let mut folder = FolderRecord::new(path);
    folder.id = Some(inner.next_id);
    inner.by_path.insert(path.to_path_buf(), folder.clone());
    folder
}

#[async_trait]
impl FolderData for InMemoryFolderData {
    async fn get_folder(&self, path: &Path, create_if_absent: bool) -> Result<FolderRecord> {
        check_folder_path(path)?;
        let mut inner = self.lock();
        match inner.by_path.get(path) {
            Some(folder) => Ok(folder.clone()),
            None if create_if_absent => Ok(insert_locked(&mut inner, path)),
            None => Err(HarnessError::NotFound(path.to_path_buf())),
        }
    }

    async fn create_folder(&self, path: &Path) -> Result<FolderRecord> {
        check_folder_path(path)?;
        let mut inner = self.lock();
        Ok(insert_locked(&mut inner, path))
    }

    async fn update_folder(&self, folder: &FolderRecord) -> Result<FolderRecord> {
        let id = stored_id(folder)?;
        check_folder_path(&folder.path)?;
        let mut inner = self.lock();

        let old_path = inner
            .by_path
            .iter()
            .find(|(_, f)| f.id == Some(id))
            .map(|(p, _)| p.clone())
            .ok_or_else(|| {
                HarnessError::storage(format!("updating folder {} affected no rows", id))
            })?;
        if let Some(owner) = inner.by_path.get(&folder.path) {
            if owner.id != Some(id) {
                return Err(HarnessError::storage(format!(
                    "updating folder {}: path {} already belongs to folder {:?}",
                    id,
                    folder.path.display(),
                    owner.id
                )));
            }
        }
        let previous = inner.by_path.remove(&old_path).map(|f| f.updated);

        let floor = previous.map_or(folder.updated, |p| p.max(folder.updated));
        let updated = folder.with_updated(next_update_time(floor));
        inner.by_path.insert(updated.path.clone(), updated.clone());
        Ok(updated)
    }

    async fn all_folders(&self) -> Result<Vec<FolderRecord>> {
        let inner = self.lock();
        let mut folders: Vec<FolderRecord> = inner.by_path.values().cloned().collect();
        folders.sort_by_key(|f| f.id);
        Ok(folders)
    }
}
