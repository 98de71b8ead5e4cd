mod support;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pathrelay_core::fs_watch::WriteDispatcher;
use pathrelay_core::{
    DetectedFile, FileProcessor, FsWatchConfig, MigrationOutcome, RelayError, Result,
    StagingWatcher,
};
use support::{Harness, write_file};
use tokio::sync::Mutex;
use tracing_subscriber::fmt::MakeWriter;

/// Stand-in processor that only remembers what it was handed.
#[derive(Default)]
struct RecordingProcessor {
    seen: Mutex<Vec<PathBuf>>,
}

impl RecordingProcessor {
    async fn seen(&self) -> Vec<PathBuf> {
        self.seen.lock().await.clone()
    }

    async fn count_for(&self, path: &Path) -> usize {
        self.seen.lock().await.iter().filter(|p| *p == path).count()
    }
}

#[async_trait]
impl FileProcessor for RecordingProcessor {
    async fn process_file(&self, file: &DetectedFile) -> Result<MigrationOutcome> {
        self.seen.lock().await.push(file.path.clone());
        Ok(MigrationOutcome::AlreadyTracked)
    }
}

fn config(settle_window: Duration) -> FsWatchConfig {
    FsWatchConfig {
        settle_window,
        ..Default::default()
    }
}

#[tokio::test]
async fn burst_of_writes_inside_window_is_handed_off_once() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let file = tmp.path().join("ep1.mkv");
    write_file(&file, b"media")?;
    let recorder = Arc::new(RecordingProcessor::default());
    let dispatcher = WriteDispatcher::new(Duration::from_secs(60), recorder.clone());

    for _ in 0..5 {
        dispatcher.on_write(&file).await;
    }

    assert_eq!(recorder.count_for(&file).await, 1);
    Ok(())
}

#[tokio::test]
async fn writes_spaced_beyond_window_are_handed_off_again() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let file = tmp.path().join("ep1.mkv");
    write_file(&file, b"media")?;
    let recorder = Arc::new(RecordingProcessor::default());
    let dispatcher = WriteDispatcher::new(Duration::from_millis(50), recorder.clone());

    dispatcher.on_write(&file).await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    dispatcher.on_write(&file).await;

    assert_eq!(recorder.count_for(&file).await, 2);
    Ok(())
}

#[tokio::test]
async fn directories_and_missing_paths_are_not_handed_off() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = tmp.path().join("show");
    std::fs::create_dir_all(&dir)?;
    let recorder = Arc::new(RecordingProcessor::default());
    let dispatcher = WriteDispatcher::new(Duration::ZERO, recorder.clone());

    dispatcher.on_write(&dir).await;
    dispatcher.on_write(&tmp.path().join("missing.mkv")).await;

    assert!(recorder.seen().await.is_empty());
    Ok(())
}

/// Log sink shared between the subscriber and the test body.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn trailing_writes_after_a_move_do_not_warn() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let recorder = Arc::new(RecordingProcessor::default());
    let dispatcher = WriteDispatcher::new(Duration::ZERO, recorder.clone());

    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    dispatcher.on_write(&tmp.path().join("moved.mkv")).await;

    assert!(recorder.seen().await.is_empty());
    assert_eq!(logs.contents(), "");
    Ok(())
}

#[tokio::test]
async fn missing_root_is_a_setup_error() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let recorder = Arc::new(RecordingProcessor::default());
    let watcher = StagingWatcher::new(
        tmp.path().join("does-not-exist"),
        config(Duration::ZERO),
        recorder,
    );

    let err = watcher.start().await.unwrap_err();
    assert!(matches!(err, RelayError::Setup { .. }), "got {err:?}");
    Ok(())
}

async fn wait_for<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn written_file_reaches_the_processor() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let existing = tmp.path().join("show");
    std::fs::create_dir_all(&existing)?;
    let recorder = Arc::new(RecordingProcessor::default());
    let watcher = StagingWatcher::new(tmp.path(), config(Duration::ZERO), recorder.clone());
    watcher.start().await?;

    let file = existing.join("ep1.mkv");
    let seen = wait_for(|| {
        let recorder = recorder.clone();
        let file = file.clone();
        async move {
            // keep writing until the notification is observed
            let _ = std::fs::write(&file, b"media");
            recorder.count_for(&file).await > 0
        }
    })
    .await;

    watcher.close().await;
    watcher.close().await;
    assert!(seen, "no write was handed off for {}", file.display());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn directories_created_after_start_are_watched() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let recorder = Arc::new(RecordingProcessor::default());
    let watcher = StagingWatcher::new(tmp.path(), config(Duration::ZERO), recorder.clone());
    watcher.start().await?;

    let file = tmp.path().join("season1").join("extras").join("clip.mkv");
    std::fs::create_dir_all(file.parent().expect("parent"))?;

    let seen = wait_for(|| {
        let recorder = recorder.clone();
        let file = file.clone();
        async move {
            let _ = std::fs::write(&file, b"clip");
            recorder.count_for(&file).await > 0
        }
    })
    .await;

    watcher.close().await;
    assert!(seen, "new directory was never registered");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watcher_feeds_the_migration_processor() -> Result<()> {
    let h = Harness::new().await?;
    let processor = Arc::new(h.processor(Duration::ZERO)?);
    let watcher = StagingWatcher::new(&h.stage, config(Duration::ZERO), processor);
    watcher.start().await?;

    let source = h.stage.join("movie.mkv");
    let target = h.lib.join("movie.mkv");
    h.seed_item(&source).await?;
    write_file(&source, b"media")?;

    let moved = wait_for(|| {
        let target = target.clone();
        async move { target.is_file() }
    })
    .await;

    watcher.close().await;
    assert!(moved, "file never reached the library");
    assert!(!source.exists());
    assert_eq!(
        h.catalog_paths().await?,
        vec![target.to_string_lossy().to_string()]
    );
    Ok(())
}
