//! Folder state orchestration.
//!
//! [`FolderManager`] joins a watcher's lifecycle events with the folder
//! store and hands consumers one stream of [`FolderRecord`] snapshots:
//! first the watch root, then every other stored folder, then one record
//! per relevant live event.
//!
//! | Event | Effect on the folder |
//! |-------|----------------------|
//! | `FolderCreated(dir)` | get-or-create `dir` |
//! | `ImportStarted(file)` | parent of `file` becomes `Importing` |
//! | `ImportSuccessful(file)` | parent of `file` becomes `Active` |
//! | `ImportFailed(file, _)` | parent of `file` becomes `ActiveWithErrors` |
//!
//! Other events are logged and produce nothing. A store error while
//! applying an event is logged and the event is skipped.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use junit_harness_core::store::FolderData;
use junit_harness_core::{FolderRecord, FolderStatus, Result, WatchEvent};

use crate::watcher::PathWatcher;

/// Something that publishes watch events for a root folder.
pub trait FolderEventSource: Send + Sync {
    fn watch_folder(&self) -> &Path;

    /// Subscribe to events published from now on.
    fn events(&self) -> UnboundedReceiver<WatchEvent>;

    fn stop(&self);
}

impl FolderEventSource for PathWatcher {
    fn watch_folder(&self) -> &Path {
        PathWatcher::watch_folder(self)
    }

    fn events(&self) -> UnboundedReceiver<WatchEvent> {
        PathWatcher::events(self)
    }

    fn stop(&self) {
        PathWatcher::stop(self)
    }
}

pub struct FolderManager {
    source: Arc<dyn FolderEventSource>,
    folders: Arc<dyn FolderData>,
}

impl FolderManager {
    pub fn new(source: Arc<dyn FolderEventSource>, folders: Arc<dyn FolderData>) -> Self {
        Self { source, folders }
    }

    /// Snapshot of known folders followed by live folder updates.
    ///
    /// The event subscription is taken before storage is read, so no
    /// change made while the snapshot is loading is lost. Must be called
    /// within a tokio runtime. The background task ends when the returned
    /// receiver is dropped.
    pub async fn folder_event_stream(&self) -> Result<UnboundedReceiver<FolderRecord>> {
        let mut events = self.source.events();
        let (tx, rx) = mpsc::unbounded_channel();

        let root = self
            .folders
            .get_folder(self.source.watch_folder(), true)
            .await?;
        let known = self.folders.all_folders().await?;

        // `rx` is still held here, so the snapshot sends cannot fail.
        let root_id = root.id;
        let snapshot = std::iter::once(root).chain(known.into_iter().filter(|f| f.id != root_id));
        for folder in snapshot {
            tx.send(folder).ok();
        }

        let folders = Arc::clone(&self.folders);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    event = events.recv() => match event {
                        Some(event) => forward(folders.as_ref(), &event, &tx).await,
                        None => break,
                    },
                }
            }
            debug!("Folder event stream closed");
        });

        Ok(rx)
    }

    pub fn watch_folder(&self) -> &Path {
        self.source.watch_folder()
    }

    /// Stop the underlying watcher. Streams already handed out still
    /// deliver updates for imports that were in flight.
    pub fn shut_down(&self) {
        self.source.stop();
    }
}

async fn forward(folders: &dyn FolderData, event: &WatchEvent, tx: &UnboundedSender<FolderRecord>) {
    match apply_event(folders, event).await {
        Ok(Some(folder)) => {
            if tx.send(folder).is_err() {
                debug!(event = %event, "Folder stream closed; update not delivered");
            }
        }
        Ok(None) => {}
        Err(e) => warn!(event = %event, error = %e, "Failed to apply folder event"),
    }
}

/// Apply one watch event to the store, returning the affected record.
pub async fn apply_event(
    folders: &dyn FolderData,
    event: &WatchEvent,
) -> Result<Option<FolderRecord>> {
    let status = match event {
        WatchEvent::FolderCreated(path) => return folders.get_folder(path, true).await.map(Some),
        WatchEvent::ImportStarted(_) => FolderStatus::Importing,
        WatchEvent::ImportSuccessful(_) => FolderStatus::Active,
        WatchEvent::ImportFailed { .. } => FolderStatus::ActiveWithErrors,
        other => {
            warn!(event = %other, "Unhandled folder event");
            return Ok(None);
        }
    };

    let Some(parent) = event.parent_folder() else {
        warn!(event = %event, "Import event has no parent folder");
        return Ok(None);
    };

    let folder = folders.get_folder(parent, true).await?;
    let updated = folders.update_folder(&folder.with_status(status)).await?;
    Ok(Some(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::EventBroadcaster;
    use junit_harness_core::store::memory::InMemoryFolderData;
    use junit_harness_core::FsEventKind;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct FakeSource {
        root: PathBuf,
        events: EventBroadcaster<WatchEvent>,
        stopped: AtomicBool,
    }

    impl FakeSource {
        fn new(root: &str) -> Arc<Self> {
            Arc::new(Self {
                root: PathBuf::from(root),
                events: EventBroadcaster::new(),
                stopped: AtomicBool::new(false),
            })
        }
    }

    impl FolderEventSource for FakeSource {
        fn watch_folder(&self) -> &Path {
            &self.root
        }

        fn events(&self) -> UnboundedReceiver<WatchEvent> {
            self.events.subscribe()
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    async fn next(rx: &mut UnboundedReceiver<FolderRecord>) -> FolderRecord {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for folder")
            .expect("stream closed")
    }

    #[tokio::test]
    async fn test_stream_starts_with_root_then_known_folders() {
        let store = Arc::new(InMemoryFolderData::new());
        store.create_folder(Path::new("/reports/old")).await.unwrap();
        let source = FakeSource::new("/reports");
        let manager = FolderManager::new(source.clone(), store.clone());

        let mut rx = manager.folder_event_stream().await.unwrap();
        assert_eq!(next(&mut rx).await.path, PathBuf::from("/reports"));
        assert_eq!(next(&mut rx).await.path, PathBuf::from("/reports/old"));
        assert!(rx.try_recv().is_err());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_import_events_drive_parent_status() {
        let store = Arc::new(InMemoryFolderData::new());
        let source = FakeSource::new("/reports");
        let manager = FolderManager::new(source.clone(), store.clone());
        let mut rx = manager.folder_event_stream().await.unwrap();
        let root = next(&mut rx).await;

        let file = PathBuf::from("/reports/nightly/TEST-a.xml");
        source.events.publish(WatchEvent::ImportStarted(file.clone()));
        let importing = next(&mut rx).await;
        assert_eq!(importing.path, PathBuf::from("/reports/nightly"));
        assert_eq!(importing.status, FolderStatus::Importing);
        assert_ne!(importing.id, root.id);

        source.events.publish(WatchEvent::ImportFailed {
            path: file.clone(),
            source_kind: FsEventKind::Create,
        });
        let failed = next(&mut rx).await;
        assert_eq!(failed.id, importing.id);
        assert_eq!(failed.status, FolderStatus::ActiveWithErrors);
        assert!(failed.updated > importing.updated);

        source
            .events
            .publish(WatchEvent::ImportSuccessful(PathBuf::from("/reports/TEST-b.xml")));
        let active = next(&mut rx).await;
        assert_eq!(active.id, root.id);
        assert_eq!(active.status, FolderStatus::Active);
    }

    #[tokio::test]
    async fn test_unhandled_events_are_skipped() {
        let store = Arc::new(InMemoryFolderData::new());
        let source = FakeSource::new("/reports");
        let manager = FolderManager::new(source.clone(), store.clone());
        let mut rx = manager.folder_event_stream().await.unwrap();
        next(&mut rx).await;

        source
            .events
            .publish(WatchEvent::FolderDeleted(PathBuf::from("/reports/gone")));
        source
            .events
            .publish(WatchEvent::FolderCreated(PathBuf::from("/reports/new")));

        let created = next(&mut rx).await;
        assert_eq!(created.path, PathBuf::from("/reports/new"));
        assert_eq!(created.status, FolderStatus::Active);
    }

    #[tokio::test]
    async fn test_store_error_skips_event() {
        let store = Arc::new(InMemoryFolderData::new());
        let source = FakeSource::new("/reports");
        let manager = FolderManager::new(source.clone(), store.clone());
        let mut rx = manager.folder_event_stream().await.unwrap();
        next(&mut rx).await;

        // Relative paths are rejected by the store.
        source
            .events
            .publish(WatchEvent::FolderCreated(PathBuf::from("relative/dir")));
        source
            .events
            .publish(WatchEvent::FolderCreated(PathBuf::from("/reports/ok")));

        assert_eq!(next(&mut rx).await.path, PathBuf::from("/reports/ok"));
    }

    #[tokio::test]
    async fn test_dropping_stream_ends_forwarding() {
        let store = Arc::new(InMemoryFolderData::new());
        let source = FakeSource::new("/reports");
        let manager = FolderManager::new(source.clone(), store.clone());
        let rx = manager.folder_event_stream().await.unwrap();
        assert_eq!(source.events.subscriber_count(), 1);
        drop(rx);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while source.events.subscriber_count() > 0 {
            assert!(tokio::time::Instant::now() < deadline, "forwarding task still running");
            tokio::time::sleep(Duration::from_millis(10)).await;
            source
                .events
                .publish(WatchEvent::FolderCreated(PathBuf::from("/reports/late")));
        }
    }

    #[tokio::test]
    async fn test_shut_down_stops_source() {
        let store = Arc::new(InMemoryFolderData::new());
        let source = FakeSource::new("/reports");
        let manager = FolderManager::new(source.clone(), store);
        manager.shut_down();
        manager.shut_down();
        assert!(source.stopped.load(Ordering::SeqCst));
    }
}
