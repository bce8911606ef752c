//! Background directory watcher that imports new reports.
//!
//! [`PathWatcher`] monitors the watch root recursively on a dedicated
//! thread. Native events are normalized into `(FsEventKind, path)` pairs:
//!
//! | Native event | Handling |
//! |--------------|----------|
//! | create / moved in, directory | publish `FolderCreated`, then walk it and import every file found |
//! | create / moved in, file | queued for import (see below) |
//! | modify / closed after write | settle timer of a queued file restarts, otherwise logged |
//! | remove / moved out | logged, dropped from the queue, file becomes eligible for import again |
//! | anything else | logged, ignored |
//!
//! A queued file is imported once it has gone `settle_interval` without a
//! further write, so a report that is still being written is not parsed
//! half-finished. Each import runs as a task on the tokio runtime that was
//! current when [`PathWatcher::start`] was called, bounded by
//! `import_workers`. A task publishes `ImportStarted`, parses and imports
//! the file, then publishes `ImportSuccessful` or `ImportFailed`. Import
//! errors never reach the watch loop.
//!
//! A file reached both by a directory walk and by its own create event is
//! imported once.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use junit_harness_core::{FsEventKind, HarnessError, Result, WatchEvent};

use crate::broadcast::EventBroadcaster;
use crate::config::{ReportFilter, WatchConfig};
use crate::importer::{import_report, BatchImporter};

/// Tuning for a [`PathWatcher`].
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Maximum number of imports running at once. `1` imports serially.
    pub import_workers: usize,
    /// How long the watch loop waits for an event before re-checking for
    /// a stop request.
    pub poll_interval: Duration,
    /// How long a new file must go without a write before it is imported.
    pub settle_interval: Duration,
    pub filter: ReportFilter,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            import_workers: 4,
            poll_interval: Duration::from_millis(100),
            settle_interval: Duration::from_millis(500),
            filter: ReportFilter::accept_all(),
        }
    }
}

impl WatchOptions {
    pub fn from_config(config: &WatchConfig) -> anyhow::Result<Self> {
        Ok(Self {
            import_workers: config.import_workers,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            settle_interval: Duration::from_millis(config.settle_ms),
            filter: config.report_filter()?,
        })
    }
}

/// State shared between the watch thread and the import tasks it spawns.
struct Shared {
    root: PathBuf,
    importer: Arc<dyn BatchImporter>,
    events: EventBroadcaster<WatchEvent>,
    filter: ReportFilter,
    permits: Arc<Semaphore>,
    claimed: Mutex<HashSet<PathBuf>>,
}

impl Shared {
    fn claims(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        lock_or_recover(&self.claimed)
    }
}

#[derive(Default)]
struct WatchControl {
    stop_flag: Option<Arc<AtomicBool>>,
    worker: Option<thread::JoinHandle<()>>,
}

pub struct PathWatcher {
    shared: Arc<Shared>,
    poll_interval: Duration,
    settle_interval: Duration,
    control: Mutex<WatchControl>,
}

impl PathWatcher {
    /// Create a watcher for `root`.
    ///
    /// The root is created if it does not exist yet and is resolved to an
    /// absolute, canonical path.
    pub fn new(
        root: impl AsRef<Path>,
        importer: Arc<dyn BatchImporter>,
        options: WatchOptions,
    ) -> Result<Self> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            return Err(HarnessError::invalid_argument("watch root must not be empty"));
        }
        if options.import_workers == 0 {
            return Err(HarnessError::invalid_argument("import_workers must be > 0"));
        }
        if options.poll_interval.is_zero() {
            return Err(HarnessError::invalid_argument("poll interval must be > 0"));
        }
        if options.settle_interval.is_zero() {
            return Err(HarnessError::invalid_argument("settle interval must be > 0"));
        }

        fs::create_dir_all(root).map_err(|e| {
            HarnessError::watch(format!("creating watch root {}: {}", root.display(), e))
        })?;
        let root = root.canonicalize().map_err(|e| {
            HarnessError::watch(format!("resolving watch root {}: {}", root.display(), e))
        })?;

        Ok(Self {
            shared: Arc::new(Shared {
                root,
                importer,
                events: EventBroadcaster::new(),
                filter: options.filter,
                permits: Arc::new(Semaphore::new(options.import_workers)),
                claimed: Mutex::new(HashSet::new()),
            }),
            poll_interval: options.poll_interval,
            settle_interval: options.settle_interval,
            control: Mutex::new(WatchControl::default()),
        })
    }

    /// Absolute path of the watched root.
    pub fn watch_folder(&self) -> &Path {
        &self.shared.root
    }

    /// Subscribe to lifecycle events published from now on.
    pub fn events(&self) -> UnboundedReceiver<WatchEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        let control = lock_or_recover(&self.control);
        control
            .worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Start watching on a background thread.
    ///
    /// Must be called from within a tokio runtime; imports are spawned onto
    /// it. Failing to set up the native watch is returned to the caller.
    /// Calling `start` on a running watcher does nothing.
    pub fn start(&self) -> Result<()> {
        let handle = Handle::try_current()
            .map_err(|e| HarnessError::watch(format!("no tokio runtime to run imports on: {}", e)))?;

        let mut control = lock_or_recover(&self.control);
        if let Some(worker) = control.worker.take() {
            if worker.is_finished() {
                if worker.join().is_err() {
                    warn!("Previous watch worker panicked");
                }
                control.stop_flag = None;
            } else {
                control.worker = Some(worker);
                return Ok(());
            }
        }

        let (event_tx, event_rx) = std::sync::mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |event| {
            if event_tx.send(event).is_err() {
                debug!("Watch event dropped because the worker channel is closed");
            }
        })
        .map_err(|e| HarnessError::watch(format!("creating native watcher: {}", e)))?;

        watcher
            .watch(&self.shared.root, RecursiveMode::Recursive)
            .map_err(|e| {
                HarnessError::watch(format!(
                    "watching {}: {}",
                    self.shared.root.display(),
                    e
                ))
            })?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let context = WorkerContext {
            shared: Arc::clone(&self.shared),
            handle,
            stop_flag: Arc::clone(&stop_flag),
            poll_interval: self.poll_interval,
            settle_interval: self.settle_interval,
        };

        let worker = thread::Builder::new()
            .name("report-watch-worker".to_owned())
            .spawn(move || run_watch_loop(watcher, event_rx, &context))
            .map_err(|e| HarnessError::watch(format!("spawning watch worker: {}", e)))?;

        info!(root = %self.shared.root.display(), "Watching for reports");
        control.stop_flag = Some(stop_flag);
        control.worker = Some(worker);
        Ok(())
    }

    /// Stop the watch loop and release the native watch.
    ///
    /// Returns once the loop has exited, which takes at most one poll
    /// interval. Imports already dispatched keep running; files still
    /// settling are dropped. Safe to call any number of times.
    pub fn stop(&self) {
        let (stop_flag, worker) = {
            let mut control = lock_or_recover(&self.control);
            (control.stop_flag.take(), control.worker.take())
        };

        if let Some(flag) = stop_flag {
            flag.store(true, Ordering::Release);
        }

        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("Watch worker panicked during shutdown");
            }
        }
    }
}

impl Drop for PathWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerContext {
    shared: Arc<Shared>,
    handle: Handle,
    stop_flag: Arc<AtomicBool>,
    poll_interval: Duration,
    settle_interval: Duration,
}

/// Files waiting for their writes to settle, keyed by path.
#[derive(Default)]
struct PendingImports {
    deadlines: HashMap<PathBuf, Instant>,
}

impl PendingImports {
    fn queue(&mut self, path: PathBuf, deadline: Instant) {
        self.deadlines.insert(path, deadline);
    }

    /// Push back the deadline of a queued file. Returns false if `path`
    /// is not queued.
    fn touch(&mut self, path: &Path, deadline: Instant) -> bool {
        match self.deadlines.get_mut(path) {
            Some(current) => {
                *current = deadline;
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, path: &Path) -> bool {
        self.deadlines.remove(path).is_some()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every file whose deadline has passed, oldest
    /// deadline first.
    fn drain_ready(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready: Vec<(Instant, PathBuf)> = Vec::new();
        self.deadlines.retain(|path, deadline| {
            if *deadline <= now {
                ready.push((*deadline, path.clone()));
                false
            } else {
                true
            }
        });
        ready.sort();
        ready.into_iter().map(|(_, path)| path).collect()
    }

    fn drain_all(&mut self) -> Vec<PathBuf> {
        self.deadlines.drain().map(|(path, _)| path).collect()
    }
}

fn run_watch_loop(
    watcher: RecommendedWatcher,
    event_rx: Receiver<notify::Result<Event>>,
    context: &WorkerContext,
) {
    let mut pending = PendingImports::default();
    while !context.stop_flag.load(Ordering::Acquire) {
        let timeout = pending.next_deadline().map_or(context.poll_interval, |deadline| {
            deadline
                .saturating_duration_since(Instant::now())
                .min(context.poll_interval)
        });

        match event_rx.recv_timeout(timeout) {
            Ok(event) => on_notify_result(context, &mut pending, event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                error!("Watch event channel closed; stopping watcher");
                context.stop_flag.store(true, Ordering::Release);
                break;
            }
        }
        while let Ok(event) = event_rx.try_recv() {
            on_notify_result(context, &mut pending, event);
        }

        for path in pending.drain_ready(Instant::now()) {
            dispatch_import(context, path);
        }
    }

    let abandoned = pending.drain_all();
    if !abandoned.is_empty() {
        let mut claims = context.shared.claims();
        for path in &abandoned {
            claims.remove(path);
        }
        info!(count = abandoned.len(), "Dropped reports still settling at shutdown");
    }

    drop(watcher);
    info!(root = %context.shared.root.display(), "Watcher stopped");
}

fn on_notify_result(
    context: &WorkerContext,
    pending: &mut PendingImports,
    event: notify::Result<Event>,
) {
    match event {
        Ok(event) => {
            for (kind, path) in classify(event) {
                handle_change(context, pending, kind, path);
            }
        }
        Err(e) => warn!(error = %e, "Watch backend reported an error"),
    }
}

/// Normalize one native event into the changes it describes.
fn classify(event: Event) -> Vec<(FsEventKind, PathBuf)> {
    let Event { kind, paths, .. } = event;
    match kind {
        EventKind::Create(_) => tag(FsEventKind::Create, paths),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => tag(FsEventKind::Create, paths),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => tag(FsEventKind::Remove, paths),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = paths.into_iter();
            let mut changes = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                changes.push((FsEventKind::Remove, from));
            }
            if let Some(to) = paths.next() {
                changes.push((FsEventKind::Create, to));
            }
            changes
        }
        EventKind::Modify(_) => tag(FsEventKind::Modify, paths),
        EventKind::Remove(_) => tag(FsEventKind::Remove, paths),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => tag(FsEventKind::Modify, paths),
        EventKind::Access(_) => Vec::new(),
        _ => tag(FsEventKind::Other, paths),
    }
}

fn tag(kind: FsEventKind, paths: Vec<PathBuf>) -> Vec<(FsEventKind, PathBuf)> {
    paths.into_iter().map(|path| (kind, path)).collect()
}

fn handle_change(
    context: &WorkerContext,
    pending: &mut PendingImports,
    kind: FsEventKind,
    path: PathBuf,
) {
    match kind {
        FsEventKind::Create => match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => on_directory_created(context, pending, &path),
            Ok(meta) if meta.is_file() => queue_import(context, pending, path),
            Ok(_) => debug!(path = %path.display(), "Ignoring created entry that is not a file"),
            Err(e) => debug!(path = %path.display(), error = %e, "Created entry vanished"),
        },
        FsEventKind::Modify => {
            if pending.touch(&path, Instant::now() + context.settle_interval) {
                debug!(path = %path.display(), "Report still being written");
            } else {
                debug!(path = %path.display(), "Modified");
            }
        }
        FsEventKind::Remove => {
            if pending.remove(&path) {
                info!(path = %path.display(), "Removed before import");
            } else {
                info!(path = %path.display(), "Removed");
            }
            context.shared.claims().remove(&path);
        }
        FsEventKind::Other => warn!(path = %path.display(), "Unhandled watch event"),
    }
}

fn on_directory_created(context: &WorkerContext, pending: &mut PendingImports, dir: &Path) {
    info!(path = %dir.display(), "Folder created");
    context
        .shared
        .events
        .publish(WatchEvent::FolderCreated(dir.to_path_buf()));

    // Files can land in a new directory before the native watch covers it.
    for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Failed to walk new folder");
                continue;
            }
        };
        if entry.file_type().is_dir() {
            context
                .shared
                .events
                .publish(WatchEvent::FolderCreated(entry.into_path()));
        } else if entry.file_type().is_file() {
            queue_import(context, pending, entry.into_path());
        }
    }
}

fn queue_import(context: &WorkerContext, pending: &mut PendingImports, path: PathBuf) {
    let shared = &context.shared;
    if !shared.filter.is_report(&shared.root, &path) {
        debug!(path = %path.display(), "Not a report file; skipping");
        return;
    }
    let deadline = Instant::now() + context.settle_interval;
    if pending.touch(&path, deadline) {
        return;
    }
    if !shared.claims().insert(path.clone()) {
        debug!(path = %path.display(), "Import already submitted");
        return;
    }
    pending.queue(path, deadline);
}

fn dispatch_import(context: &WorkerContext, path: PathBuf) {
    let shared = Arc::clone(&context.shared);
    context.handle.spawn(async move {
        let _permit = match Arc::clone(&shared.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Import worker pool closed");
                return;
            }
        };
        run_import(&shared, path).await;
    });
}

async fn run_import(shared: &Shared, path: PathBuf) {
    shared.events.publish(WatchEvent::ImportStarted(path.clone()));

    match import_report(shared.importer.as_ref(), &path).await {
        Ok(rows) => {
            info!(path = %path.display(), results = rows, "Imported report");
            shared.events.publish(WatchEvent::ImportSuccessful(path));
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, kind = e.kind(), "Import failed");
            shared.events.publish(WatchEvent::ImportFailed {
                path,
                source_kind: FsEventKind::Create,
            });
        }
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
