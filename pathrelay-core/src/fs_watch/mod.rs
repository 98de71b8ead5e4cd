//! Filesystem watch pipeline for the staging tree.
//!
//! A thin wrapper around `notify` that registers every staging directory,
//! forwards raw notifications over a channel to a single consumer loop, and
//! hands each settled write to a [`FileProcessor`]. Directories created after
//! startup are registered as they appear.

pub mod settle;

pub use settle::SettleTracker;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{AccessKind, AccessMode, EventKind, ModifyKind};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, spawn_blocking};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{RelayError, Result};
use crate::relocate::{FileProcessor, MigrationOutcome};
use crate::types::DetectedFile;

/// Configuration knobs for the staging watcher.
#[derive(Clone, Debug)]
pub struct FsWatchConfig {
    /// Minimum time between two hand-offs of the same path.
    pub settle_window: Duration,
    /// Capacity of the channel between the notify thread and the loop.
    pub channel_capacity: usize,
}

impl Default for FsWatchConfig {
    fn default() -> Self {
        Self {
            settle_window: Duration::from_secs(24 * 60 * 60),
            channel_capacity: 1024,
        }
    }
}

enum WatchMessage {
    Event(Event),
    Error(String),
}

impl fmt::Debug for WatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchMessage::Event(event) => f
                .debug_struct("WatchMessage::Event")
                .field("kind", &event.kind)
                .field("path_count", &event.paths.len())
                .finish(),
            WatchMessage::Error(message) => f
                .debug_struct("WatchMessage::Error")
                .field("message", message)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchAction {
    Write,
    Create,
    Ignore,
}

fn classify_event(kind: &EventKind) -> WatchAction {
    match kind {
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => WatchAction::Write,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => WatchAction::Write,
        EventKind::Create(_) => WatchAction::Create,
        _ => WatchAction::Ignore,
    }
}

type Backend = Arc<Mutex<Option<RecommendedWatcher>>>;

/// Turns write notifications into at most one hand-off per settle window.
pub struct WriteDispatcher {
    settle: SettleTracker,
    processor: Arc<dyn FileProcessor>,
}

impl fmt::Debug for WriteDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteDispatcher")
            .field("settle", &self.settle)
            .finish_non_exhaustive()
    }
}

impl WriteDispatcher {
    pub fn new(settle_window: Duration, processor: Arc<dyn FileProcessor>) -> Self {
        Self {
            settle: SettleTracker::new(settle_window),
            processor,
        }
    }

    /// Handle one write notification for `path`. Errors stay local to the file.
    pub async fn on_write(&self, path: &Path) {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            // Trailing events for a file that was just moved into the library.
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "written path is gone");
                return;
            }
            Err(err) => {
                warn!(error = %err, path = %path.display(), "stat failed for written path");
                return;
            }
        };
        if !metadata.is_file() {
            return;
        }

        if !self.settle.should_trigger(path, Instant::now()).await {
            debug!(path = %path.display(), "still settling, write suppressed");
            return;
        }

        let file = DetectedFile::from_metadata(path, &metadata);
        match self.processor.process_file(&file).await {
            Ok(MigrationOutcome::Migrated(_)) => {}
            Ok(outcome) => {
                debug!(path = %path.display(), ?outcome, "no migration needed");
            }
            Err(err @ RelayError::Path { .. }) => {
                warn!(error = %err, path = %path.display(), "skipping file");
            }
            Err(err) => {
                error!(error = %err, path = %path.display(), "process file error");
            }
        }
    }
}

/// Watches the staging root and feeds settled writes to a processor.
pub struct StagingWatcher {
    root: PathBuf,
    config: FsWatchConfig,
    dispatcher: Arc<WriteDispatcher>,
    backend: Backend,
    shutdown: CancellationToken,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for StagingWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = self
            .loop_task
            .try_lock()
            .map(|guard| guard.as_ref().is_some_and(|task| !task.is_finished()))
            .unwrap_or(true);
        f.debug_struct("StagingWatcher")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("running", &running)
            .finish()
    }
}

impl StagingWatcher {
    pub fn new(
        root: impl Into<PathBuf>,
        config: FsWatchConfig,
        processor: Arc<dyn FileProcessor>,
    ) -> Self {
        let dispatcher = Arc::new(WriteDispatcher::new(config.settle_window, processor));
        Self {
            root: root.into(),
            config,
            dispatcher,
            backend: Arc::new(Mutex::new(None)),
            shutdown: CancellationToken::new(),
            loop_task: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register the staging tree and start the notification loop.
    pub async fn start(&self) -> Result<()> {
        let mut backend = self.backend.lock().await;
        if backend.is_some() {
            return Ok(());
        }

        let setup_error = |message: String| RelayError::Setup {
            path: self.root.clone(),
            message,
        };

        let metadata = tokio::fs::metadata(&self.root)
            .await
            .map_err(|e| setup_error(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(setup_error("not a directory".to_string()));
        }

        let (tx, rx) = mpsc::channel::<WatchMessage>(self.config.channel_capacity.max(1));
        let root = self.root.clone();
        let (watcher, registered) = spawn_blocking(move || init_backend(&root, tx))
            .await
            .map_err(|e| setup_error(format!("watcher initialization panicked: {e}")))??;
        *backend = Some(watcher);
        drop(backend);

        info!(root = %self.root.display(), directories = registered, "watching staging tree");

        let task = spawn_watch_loop(
            rx,
            Arc::clone(&self.backend),
            Arc::clone(&self.dispatcher),
            self.shutdown.clone(),
        );
        *self.loop_task.lock().await = Some(task);
        Ok(())
    }

    /// Release the notify handle and wait for the in-flight file to finish.
    /// Calling this more than once is a no-op.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let watcher = self.backend.lock().await.take();
        drop(watcher);

        let task = self.loop_task.lock().await.take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                error!(error = %err, "watch loop terminated abnormally");
            }
            info!(root = %self.root.display(), "staging watcher stopped");
        }
    }
}

fn spawn_watch_loop(
    mut rx: mpsc::Receiver<WatchMessage>,
    backend: Backend,
    dispatcher: Arc<WriteDispatcher>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = rx.recv() => msg,
            };

            let Some(msg) = msg else {
                debug!("watch channel closed");
                break;
            };

            match msg {
                WatchMessage::Event(event) => match classify_event(&event.kind) {
                    WatchAction::Write => {
                        for path in &event.paths {
                            dispatcher.on_write(path).await;
                        }
                    }
                    WatchAction::Create => {
                        for path in &event.paths {
                            register_created_dir(&backend, path).await;
                        }
                    }
                    WatchAction::Ignore => {}
                },
                WatchMessage::Error(message) => {
                    error!(error = %message, "watcher error");
                }
            }
        }
    })
}

async fn register_created_dir(backend: &Backend, path: &Path) {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => {}
        _ => return,
    }

    let mut guard = backend.lock().await;
    let Some(watcher) = guard.as_mut() else {
        return;
    };
    match register_tree(watcher, path) {
        Ok(count) => debug!(path = %path.display(), directories = count, "registered new directory"),
        Err(err) => warn!(error = %err, path = %path.display(), "failed to watch new directory"),
    }
}

fn init_backend(
    root: &Path,
    tx: mpsc::Sender<WatchMessage>,
) -> Result<(RecommendedWatcher, usize)> {
    let setup_error = |message: String| RelayError::Setup {
        path: root.to_path_buf(),
        message,
    };

    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                if let Err(err) = tx.blocking_send(WatchMessage::Event(event)) {
                    debug!("fs_watch channel send failed: {}", err);
                }
            }
            Err(err) => {
                let _ = tx.blocking_send(WatchMessage::Error(err.to_string()));
            }
        },
        NotifyConfig::default(),
    )
    .map_err(|e| setup_error(format!("failed to create watcher: {e}")))?;

    let registered = register_tree(&mut watcher, root)?;
    Ok((watcher, registered))
}

/// Register `dir` and every directory below it, without following symlinks.
fn register_tree(watcher: &mut RecommendedWatcher, dir: &Path) -> Result<usize> {
    let setup_error = |path: &Path, message: String| RelayError::Setup {
        path: path.to_path_buf(),
        message,
    };

    let mut pending = vec![dir.to_path_buf()];
    let mut registered = 0;
    while let Some(current) = pending.pop() {
        watcher
            .watch(&current, RecursiveMode::NonRecursive)
            .map_err(|e| setup_error(&current, e.to_string()))?;
        registered += 1;

        let entries =
            std::fs::read_dir(&current).map_err(|e| setup_error(&current, e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| setup_error(&current, e.to_string()))?;
            let file_type = entry
                .file_type()
                .map_err(|e| setup_error(&entry.path(), e.to_string()))?;
            if file_type.is_dir() {
                pending.push(entry.path());
            }
        }
    }
    Ok(registered)
}
