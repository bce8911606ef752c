mod common;

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use junit_harness::folder_manager::FolderManager;
use junit_harness::watcher::{PathWatcher, WatchOptions};
use junit_harness::{FolderData, FolderStatus, FsEventKind, HarnessError, WatchEvent};

use common::{canonical, drop_report, recv_within, report_named, test_db, MALFORMED};

struct Tally {
    started: HashSet<PathBuf>,
    succeeded: HashSet<PathBuf>,
    failed: Vec<(PathBuf, FsEventKind)>,
    folders_created: HashSet<PathBuf>,
}

impl Tally {
    fn new() -> Self {
        Self {
            started: HashSet::new(),
            succeeded: HashSet::new(),
            failed: Vec::new(),
            folders_created: HashSet::new(),
        }
    }

    fn finished(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    fn record(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::ImportStarted(p) => {
                self.started.insert(p);
            }
            WatchEvent::ImportSuccessful(p) => {
                self.succeeded.insert(p);
            }
            WatchEvent::ImportFailed { path, source_kind } => self.failed.push((path, source_kind)),
            WatchEvent::FolderCreated(p) => {
                self.folders_created.insert(p);
            }
            other => panic!("unexpected event {}", other),
        }
    }
}

/// Collect events until `finished` imports have completed.
async fn collect(rx: &mut UnboundedReceiver<WatchEvent>, finished: usize, secs: u64) -> Tally {
    let mut tally = Tally::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    while tally.finished() < finished {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(event)) => tally.record(event),
            _ => panic!(
                "timed out: {} started, {} succeeded, {} failed",
                tally.started.len(),
                tally.succeeded.len(),
                tally.failed.len()
            ),
        }
    }
    tally
}

fn options(workers: usize) -> WatchOptions {
    WatchOptions {
        import_workers: workers,
        poll_interval: Duration::from_millis(50),
        settle_interval: Duration::from_millis(200),
        ..WatchOptions::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bulk_import_of_ten_folders() {
    let db = test_db().await;
    let watch_root = TempDir::new().unwrap();
    let staging = TempDir::new_in(watch_root.path().parent().unwrap()).unwrap();

    let watcher = PathWatcher::new(watch_root.path(), db.importer(50), options(4)).unwrap();
    let mut events = watcher.events();
    watcher.start().unwrap();

    let mut expected = HashSet::new();
    for folder in 0..10 {
        let staged_dir = staging.path().join(format!("run-{:02}", folder));
        fs::create_dir(&staged_dir).unwrap();
        for report in 0..20 {
            let name = format!("TEST-com.acme.Suite{:02}x{:02}.xml", folder, report);
            fs::write(
                staged_dir.join(&name),
                report_named(&format!("com.acme.Suite{:02}x{:02}", folder, report)),
            )
            .unwrap();
        }
        let dest = watcher.watch_folder().join(format!("run-{:02}", folder));
        fs::rename(&staged_dir, &dest).unwrap();
        for report in 0..20 {
            expected.insert(dest.join(format!("TEST-com.acme.Suite{:02}x{:02}.xml", folder, report)));
        }
    }

    let tally = collect(&mut events, 200, 120).await;
    watcher.stop();

    assert!(tally.failed.is_empty(), "failures: {:?}", tally.failed);
    assert_eq!(tally.started.len(), 200);
    assert_eq!(tally.succeeded.len(), 200);
    assert_eq!(tally.started, tally.succeeded);
    assert_eq!(tally.succeeded, expected);
    assert_eq!(tally.folders_created.len(), 10);

    assert_eq!(db.count("testSuite").await, 200);
    assert_eq!(db.count("testEntry").await, 200 * 18);
    // Ten run folders; the watch root itself only appears once something asks for it.
    assert_eq!(db.count("folder").await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_malformed_report_does_not_stop_watcher() {
    let db = test_db().await;
    let watch_root = TempDir::new().unwrap();
    let staging = TempDir::new_in(watch_root.path().parent().unwrap()).unwrap();

    let watcher = PathWatcher::new(watch_root.path(), db.importer(1000), options(1)).unwrap();
    let mut events = watcher.events();
    watcher.start().unwrap();
    let root = watcher.watch_folder().to_path_buf();

    drop_report(staging.path(), &root.join("TEST-bad.xml"), MALFORMED);
    drop_report(staging.path(), &root.join("TEST-good1.xml"), &report_named("a.Good1"));
    drop_report(staging.path(), &root.join("TEST-good2.xml"), &report_named("a.Good2"));

    let tally = collect(&mut events, 3, 30).await;
    assert_eq!(
        tally.failed,
        vec![(root.join("TEST-bad.xml"), FsEventKind::Create)]
    );
    assert_eq!(tally.succeeded.len(), 2);
    assert_eq!(tally.started.len(), 3);

    // Still watching after the failure.
    drop_report(staging.path(), &root.join("TEST-later.xml"), &report_named("a.Later"));
    let later = collect(&mut events, 1, 30).await;
    assert!(later.succeeded.contains(&root.join("TEST-later.xml")));

    watcher.stop();
    assert_eq!(db.count("testSuite").await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_filter_skips_non_report_files() {
    let db = test_db().await;
    let watch_root = TempDir::new().unwrap();
    let staging = TempDir::new_in(watch_root.path().parent().unwrap()).unwrap();

    let mut opts = options(2);
    let mut watch = junit_harness::config::WatchConfig::for_root(watch_root.path());
    watch.include_globs = vec!["**/TEST-*.xml".to_string()];
    opts.filter = watch.report_filter().unwrap();

    let watcher = PathWatcher::new(watch_root.path(), db.importer(1000), opts).unwrap();
    let mut events = watcher.events();
    watcher.start().unwrap();
    let root = watcher.watch_folder().to_path_buf();

    drop_report(staging.path(), &root.join("notes.txt"), "not a report");
    drop_report(staging.path(), &root.join("TEST-ok.xml"), &report_named("a.Ok"));

    let tally = collect(&mut events, 1, 30).await;
    assert_eq!(tally.started, HashSet::from([root.join("TEST-ok.xml")]));
    watcher.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_report_written_in_chunks_imports_once_complete() {
    let db = test_db().await;
    let watch_root = TempDir::new().unwrap();

    let opts = WatchOptions {
        settle_interval: Duration::from_millis(1000),
        ..options(1)
    };
    let watcher = PathWatcher::new(watch_root.path(), db.importer(1000), opts).unwrap();
    let mut events = watcher.events();
    watcher.start().unwrap();
    let path = watcher.watch_folder().join("TEST-chunked.xml");

    let content = report_named("a.Chunked");
    let (head, tail) = content.split_at(content.len() / 2);
    let mut file = fs::File::create(&path).unwrap();
    file.write_all(head.as_bytes()).unwrap();
    file.flush().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    file.write_all(tail.as_bytes()).unwrap();
    file.flush().unwrap();
    drop(file);

    let tally = collect(&mut events, 1, 30).await;
    watcher.stop();

    assert!(tally.failed.is_empty(), "failures: {:?}", tally.failed);
    assert_eq!(tally.started, HashSet::from([path.clone()]));
    assert_eq!(tally.succeeded, HashSet::from([path]));
    assert_eq!(db.count("testSuite").await, 1);
    assert_eq!(db.count("testEntry").await, 18);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_report_removed_while_settling_is_not_imported() {
    let db = test_db().await;
    let watch_root = TempDir::new().unwrap();
    let staging = TempDir::new_in(watch_root.path().parent().unwrap()).unwrap();

    let opts = WatchOptions {
        settle_interval: Duration::from_millis(1000),
        ..options(1)
    };
    let watcher = PathWatcher::new(watch_root.path(), db.importer(1000), opts).unwrap();
    let mut events = watcher.events();
    watcher.start().unwrap();
    let root = watcher.watch_folder().to_path_buf();

    drop_report(staging.path(), &root.join("TEST-gone.xml"), &report_named("a.Gone"));
    tokio::time::sleep(Duration::from_millis(200)).await;
    fs::remove_file(root.join("TEST-gone.xml")).unwrap();
    drop_report(staging.path(), &root.join("TEST-kept.xml"), &report_named("a.Kept"));

    let tally = collect(&mut events, 1, 30).await;
    watcher.stop();

    assert_eq!(tally.started, HashSet::from([root.join("TEST-kept.xml")]));
    assert_eq!(tally.succeeded, HashSet::from([root.join("TEST-kept.xml")]));
    assert_eq!(db.count("testSuite").await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_is_idempotent_and_watch_root_created() {
    let db = test_db().await;
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("not/yet/there");

    let watcher = PathWatcher::new(&root, db.importer(10), options(1)).unwrap();
    assert!(root.is_dir());
    assert_eq!(watcher.watch_folder(), canonical(&root));
    assert!(watcher.watch_folder().is_absolute());

    watcher.stop();
    watcher.start().unwrap();
    assert!(watcher.is_running());
    watcher.stop();
    watcher.stop();
    assert!(!watcher.is_running());
}

#[tokio::test]
async fn test_start_outside_runtime_is_watch_error() {
    let db = test_db().await;
    let tmp = TempDir::new().unwrap();
    let watcher = PathWatcher::new(tmp.path(), db.importer(10), options(1)).unwrap();

    // A plain thread has no tokio context to spawn imports on.
    let result = std::thread::scope(|s| s.spawn(|| watcher.start()).join().unwrap());
    assert!(matches!(result, Err(HarnessError::Watch(_))));
    assert!(!watcher.is_running());
}

#[tokio::test]
async fn test_zero_workers_or_settle_rejected() {
    let db = test_db().await;
    let tmp = TempDir::new().unwrap();
    let err = PathWatcher::new(tmp.path(), db.importer(10), options(0))
        .err()
        .unwrap();
    assert!(matches!(err, HarnessError::InvalidArgument(_)));

    let no_settle = WatchOptions {
        settle_interval: Duration::ZERO,
        ..options(1)
    };
    let err = PathWatcher::new(tmp.path(), db.importer(10), no_settle)
        .err()
        .unwrap();
    assert!(matches!(err, HarnessError::InvalidArgument(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_folder_manager_follows_imports() {
    let db = test_db().await;
    let watch_root = TempDir::new().unwrap();
    let staging = TempDir::new_in(watch_root.path().parent().unwrap()).unwrap();

    // A folder known from an earlier run.
    let old = canonical(watch_root.path()).join("old-run");
    fs::create_dir(&old).unwrap();
    db.folders.create_folder(&old).await.unwrap();

    let watcher = Arc::new(PathWatcher::new(watch_root.path(), db.importer(100), options(1)).unwrap());
    watcher.start().unwrap();
    let manager = FolderManager::new(watcher.clone(), db.folders.clone());
    let root = manager.watch_folder().to_path_buf();

    let mut stream = manager.folder_event_stream().await.unwrap();
    let first = recv_within(&mut stream, 5).await.unwrap();
    assert_eq!(first.path, root);
    let second = recv_within(&mut stream, 5).await.unwrap();
    assert_eq!(second.path, old);

    let nightly_staged = staging.path().join("nightly");
    fs::create_dir(&nightly_staged).unwrap();
    fs::write(nightly_staged.join("TEST-a.xml"), report_named("n.A")).unwrap();
    fs::rename(&nightly_staged, root.join("nightly")).unwrap();

    let nightly = root.join("nightly");
    let mut statuses = Vec::new();
    while statuses.len() < 3 {
        let folder = recv_within(&mut stream, 30).await.expect("folder update");
        assert_eq!(folder.path, nightly);
        statuses.push(folder.status);
    }
    assert_eq!(
        statuses,
        vec![FolderStatus::Active, FolderStatus::Importing, FolderStatus::Active]
    );

    // A failed import marks the folder.
    drop_report(staging.path(), &nightly.join("TEST-bad.xml"), MALFORMED);
    let mut last = None;
    while last != Some(FolderStatus::ActiveWithErrors) {
        let folder = recv_within(&mut stream, 30).await.expect("folder update");
        assert_eq!(folder.path, nightly);
        last = Some(folder.status);
    }

    manager.shut_down();
    assert!(!watcher.is_running());
}
