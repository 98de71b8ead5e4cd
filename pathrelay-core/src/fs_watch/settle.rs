use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Entries kept before stale ones are pruned.
const PRUNE_THRESHOLD: usize = 4096;

/// Per-path "last handled" times deciding whether a write starts a new
/// migration attempt.
///
/// The first write of a burst triggers immediately; later writes are
/// suppressed until `window` has passed since the last trigger.
#[derive(Debug)]
pub struct SettleTracker {
    window: Duration,
    last_handled: Mutex<HashMap<PathBuf, Instant>>,
}

impl SettleTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_handled: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records `now` and returns true when `path` should be handed off.
    pub async fn should_trigger(&self, path: &Path, now: Instant) -> bool {
        let mut guard = self.last_handled.lock().await;

        if let Some(last) = guard.get(path)
            && now.saturating_duration_since(*last) < self.window
        {
            return false;
        }

        if guard.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            guard.retain(|_, last| now.saturating_duration_since(*last) < window);
        }
        guard.insert(path.to_path_buf(), now);
        true
    }

    pub async fn tracked_paths(&self) -> usize {
        self.last_handled.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_inside_the_window_are_suppressed() {
        let tracker = SettleTracker::new(Duration::from_secs(10));
        let path = Path::new("/stage/show/ep1.mkv");
        let start = Instant::now();

        assert!(tracker.should_trigger(path, start).await);
        assert!(!tracker.should_trigger(path, start + Duration::from_secs(3)).await);
        assert!(!tracker.should_trigger(path, start + Duration::from_secs(9)).await);
    }

    #[tokio::test]
    async fn writes_past_the_window_trigger_again() {
        let tracker = SettleTracker::new(Duration::from_secs(10));
        let path = Path::new("/stage/show/ep1.mkv");
        let start = Instant::now();

        assert!(tracker.should_trigger(path, start).await);
        assert!(tracker.should_trigger(path, start + Duration::from_secs(11)).await);
        // the window restarts from the latest trigger
        assert!(!tracker.should_trigger(path, start + Duration::from_secs(15)).await);
    }

    #[tokio::test]
    async fn paths_are_tracked_independently() {
        let tracker = SettleTracker::new(Duration::from_secs(10));
        let start = Instant::now();

        assert!(tracker.should_trigger(Path::new("/stage/a.mkv"), start).await);
        assert!(tracker.should_trigger(Path::new("/stage/b.mkv"), start).await);
        assert_eq!(tracker.tracked_paths().await, 2);
    }

    #[tokio::test]
    async fn zero_window_never_suppresses() {
        let tracker = SettleTracker::new(Duration::ZERO);
        let path = Path::new("/stage/a.mkv");
        let start = Instant::now();

        assert!(tracker.should_trigger(path, start).await);
        assert!(tracker.should_trigger(path, start).await);
    }

    #[tokio::test]
    async fn pruning_drops_only_expired_entries() {
        let tracker = SettleTracker::new(Duration::from_secs(10));
        let start = Instant::now();

        for i in 0..PRUNE_THRESHOLD {
            let path = PathBuf::from(format!("/stage/{i}.mkv"));
            assert!(tracker.should_trigger(&path, start).await);
        }
        let fresh = start + Duration::from_secs(5);
        assert!(tracker.should_trigger(Path::new("/stage/new.mkv"), fresh).await);
        assert_eq!(tracker.tracked_paths().await, PRUNE_THRESHOLD + 1);

        let later = start + Duration::from_secs(12);
        assert!(tracker.should_trigger(Path::new("/stage/late.mkv"), later).await);
        // only new.mkv (5s old) survives alongside late.mkv
        assert_eq!(tracker.tracked_paths().await, 2);
        assert!(!tracker.should_trigger(Path::new("/stage/new.mkv"), later).await);
    }
}
