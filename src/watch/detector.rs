use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::core::config::FolderWatchConfig;
use crate::core::error::WatchError;
use crate::core::types::{UploadOutcome, UploadSource};
use crate::ingest::orchestrator::UploadOrchestrator;
use crate::observability::metrics as obs;
use crate::storage::ObjectStore;

use super::clipboard::{clipboard_text, ClipboardSink};

/// Spacing between the two size samples that must agree.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// File samples
// ---------------------------------------------------------------------------

/// One sample of a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDetails {
    pub size: u64,
    pub readable: bool,
}

impl FileDetails {
    const UNREADABLE: FileDetails = FileDetails {
        size: 0,
        readable: false,
    };
}

/// Open `path` for reading and stat the open handle.
pub async fn file_details(path: &Path) -> FileDetails {
    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(_) => return FileDetails::UNREADABLE,
    };
    match file.metadata().await {
        Ok(meta) => FileDetails {
            size: meta.len(),
            readable: true,
        },
        Err(_) => FileDetails::UNREADABLE,
    }
}

/// Check that the watch root is configured and is an existing directory.
pub fn validate_root(path: &str) -> Result<PathBuf, WatchError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(WatchError::MissingPath);
    }
    let root = PathBuf::from(trimmed);
    let meta = std::fs::metadata(&root).map_err(|_| WatchError::PathNotFound {
        path: trimmed.to_string(),
    })?;
    if !meta.is_dir() {
        return Err(WatchError::NotADirectory {
            path: trimmed.to_string(),
        });
    }
    Ok(root)
}

/// Paths in `event` that should (re)start a stability wait.
///
/// Creates, writes and rename targets count. Rename sources, removals and
/// access events do not.
pub fn paths_to_check(event: &Event) -> Vec<PathBuf> {
    match &event.kind {
        EventKind::Create(_) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.get(1).cloned().into_iter().collect()
        }
        EventKind::Modify(_) => event.paths.clone(),
        EventKind::Remove(_) | EventKind::Access(_) | EventKind::Any | EventKind::Other => {
            Vec::new()
        }
    }
}

fn event_label(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::Create(_) => "create",
        EventKind::Modify(ModifyKind::Name(_)) => "rename",
        EventKind::Modify(_) => "write",
        EventKind::Remove(_) => "remove",
        EventKind::Access(_) => "access",
        EventKind::Any | EventKind::Other => "other",
    }
}

// ---------------------------------------------------------------------------
// Stability detector
// ---------------------------------------------------------------------------

/// Tracking state for one pending path.
struct WatchEntry {
    baseline: FileDetails,
    /// Distinguishes this arming from earlier ones for the same path.
    generation: u64,
    cancel: CancellationToken,
}

struct DetectorInner<S: ObjectStore> {
    orchestrator: Arc<UploadOrchestrator<S>>,
    clipboard: Arc<dyn ClipboardSink>,
    config: FolderWatchConfig,
    entries: Mutex<HashMap<PathBuf, WatchEntry>>,
    next_generation: AtomicU64,
}

/// Uploads files dropped into a directory once they stop changing.
///
/// Per path: an event records a baseline sample and arms a repeating poll.
/// Each tick takes a fresh sample; matching size while readable means
/// stable, anything else replaces the baseline. A new event for a path that
/// is already pending cancels its poll and re-arms from scratch.
///
/// The entry table sits behind one mutex. Samples and uploads run outside it;
/// the lock is only taken to compare-and-commit.
pub struct StabilityDetector<S: ObjectStore> {
    inner: Arc<DetectorInner<S>>,
    poll_interval: Duration,
}

impl<S: ObjectStore> Clone for StabilityDetector<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            poll_interval: self.poll_interval,
        }
    }
}

impl<S: ObjectStore + 'static> StabilityDetector<S> {
    pub fn new(
        orchestrator: Arc<UploadOrchestrator<S>>,
        config: &FolderWatchConfig,
        clipboard: Arc<dyn ClipboardSink>,
    ) -> Self {
        Self {
            inner: Arc::new(DetectorInner {
                orchestrator,
                clipboard,
                config: config.clone(),
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Number of paths currently waiting to become stable.
    pub fn tracked_paths(&self) -> usize {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Watch the configured directory until `cancel` fires or the
    /// subscription ends.
    ///
    /// A bad root fails before anything is spawned. On exit every pending
    /// poll is cancelled.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), WatchError> {
        let root = validate_root(&self.inner.config.path)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // The receiver only goes away during shutdown.
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::NonRecursive)?;

        info!(
            path = %root.display(),
            prefix = %self.inner.config.prefix,
            auto_delete = self.inner.config.auto_delete_file,
            auto_clipboard = self.inner.config.auto_clipboard,
            "looking for new files"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("folder watcher shutting down");
                    break;
                }
                msg = rx.recv() => match msg {
                    Some(Ok(event)) => {
                        obs::inc_watch_event(event_label(&event.kind));
                        trace!(kind = ?event.kind, paths = ?event.paths, "filesystem event");
                        for path in paths_to_check(&event) {
                            self.handle_event(path).await;
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "filesystem watch error"),
                    None => {
                        warn!("filesystem event stream closed");
                        break;
                    }
                }
            }
        }

        drop(watcher);
        self.stop_all();
        Ok(())
    }

    /// Arm (or re-arm) the stability wait for `path`.
    pub async fn handle_event(&self, path: PathBuf) {
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            if meta.is_dir() {
                return;
            }
        }

        let baseline = file_details(&path).await;
        let cancel = CancellationToken::new();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut entries = self.inner.entries.lock().unwrap_or_else(|e| e.into_inner());
            let previous = entries.insert(
                path.clone(),
                WatchEntry {
                    baseline,
                    generation,
                    cancel: cancel.clone(),
                },
            );
            if let Some(previous) = previous {
                previous.cancel.cancel();
            }
            obs::set_watch_tracked_paths(entries.len() as f64);
        }

        debug!(
            path = %path.display(),
            size = baseline.size,
            readable = baseline.readable,
            "waiting for file to settle"
        );

        let inner = self.inner.clone();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            poll_until_stable(inner, path, generation, cancel, interval).await;
        });
    }

    /// Cancel every pending poll and forget all tracked paths.
    pub fn stop_all(&self) {
        let mut entries = self.inner.entries.lock().unwrap_or_else(|e| e.into_inner());
        for (_, entry) in entries.drain() {
            entry.cancel.cancel();
        }
        obs::set_watch_tracked_paths(0.0);
    }
}

/// Outcome of comparing a fresh sample against the stored baseline.
enum Tick {
    Stable,
    Unsettled,
    /// The entry was replaced, removed, or the file is gone. A vanished
    /// path is dropped from the table; its next create or write event
    /// tracks it again from a fresh baseline.
    Abandon,
}

async fn poll_until_stable<S: ObjectStore + 'static>(
    inner: Arc<DetectorInner<S>>,
    path: PathBuf,
    generation: u64,
    cancel: CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let now = file_details(&path).await;
        let missing = !now.readable && !tokio::fs::try_exists(&path).await.unwrap_or(true);

        let tick = {
            let mut entries = inner.entries.lock().unwrap_or_else(|e| e.into_inner());
            let tick = match entries.get(&path) {
                Some(entry) if entry.generation == generation => {
                    if missing {
                        Tick::Abandon
                    } else if now.readable && now.size == entry.baseline.size {
                        Tick::Stable
                    } else {
                        Tick::Unsettled
                    }
                }
                _ => return,
            };
            match tick {
                Tick::Stable | Tick::Abandon => {
                    entries.remove(&path);
                }
                Tick::Unsettled => {
                    if let Some(entry) = entries.get_mut(&path) {
                        entry.baseline = now;
                    }
                }
            }
            obs::set_watch_tracked_paths(entries.len() as f64);
            tick
        };

        match tick {
            Tick::Stable => {
                debug!(path = %path.display(), size = now.size, "file is stable");
                upload_stable(&inner, &path).await;
                return;
            }
            Tick::Unsettled => {
                trace!(path = %path.display(), size = now.size, readable = now.readable, "file still changing");
            }
            Tick::Abandon => {
                debug!(path = %path.display(), "file disappeared before settling");
                return;
            }
        }
    }
}

async fn upload_stable<S: ObjectStore>(inner: &DetectorInner<S>, path: &Path) {
    let source = UploadSource::LocalPath(path.to_path_buf());
    match inner.orchestrator.upload(source, &inner.config.prefix).await {
        Ok(outcome) => {
            obs::inc_watch_upload("ok");
            run_post_actions(inner, path, &outcome).await;
        }
        Err(e) => {
            obs::inc_watch_upload("error");
            error!(path = %path.display(), error = %e, "folder watch upload failed");
        }
    }
}

async fn run_post_actions<S: ObjectStore>(
    inner: &DetectorInner<S>,
    path: &Path,
    outcome: &UploadOutcome,
) {
    if inner.config.auto_delete_file {
        match tokio::fs::remove_file(path).await {
            Ok(()) => info!(path = %path.display(), "auto deleted source file"),
            Err(e) => warn!(path = %path.display(), error = %e, "auto delete failed"),
        }
    }

    if inner.config.auto_clipboard {
        let text = clipboard_text(&inner.config, outcome);
        match inner.clipboard.write_text(&text) {
            Ok(()) => info!(text = %text, "copied to clipboard"),
            Err(e) => warn!(error = %e, "clipboard write failed"),
        }
    }
}
