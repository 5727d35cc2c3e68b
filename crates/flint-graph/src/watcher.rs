//! OS file watching.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A filesystem event after kind mapping, one per affected path.
///
/// Creations count as changes: editors that save through a rename produce
/// create events for files we already track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Changed(PathBuf),
    Removed(PathBuf),
}

impl FsEvent {
    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Changed(path) | FsEvent::Removed(path) => path,
        }
    }
}

/// The set of individually watched files.
///
/// Each path gets its own non-recursive watch. Watch and unwatch are
/// idempotent; registration failures are logged and skipped so a dependency
/// that vanished mid-request cannot fail the transform that found it.
pub struct WatchSet {
    watcher: Mutex<RecommendedWatcher>,
    watched: Mutex<FxHashSet<PathBuf>>,
}

impl WatchSet {
    /// Create the OS watcher, forwarding mapped events into `tx`.
    pub fn new(tx: mpsc::Sender<FsEvent>) -> notify::Result<Self> {
        let watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "file watcher error");
                    return;
                }
            };
            let Event { kind, paths, .. } = event;
            for path in paths {
                let mapped = match kind {
                    EventKind::Create(_) | EventKind::Modify(_) => FsEvent::Changed(path),
                    EventKind::Remove(_) => FsEvent::Removed(path),
                    _ => continue,
                };
                // Receiver gone means the server is shutting down.
                if tx.blocking_send(mapped).is_err() {
                    return;
                }
            }
        })?;
        Ok(Self {
            watcher: Mutex::new(watcher),
            watched: Mutex::new(FxHashSet::default()),
        })
    }

    /// Start observing `path`. Safe to call repeatedly.
    pub fn watch(&self, path: &Path) {
        let mut watched = self.watched.lock();
        if watched.contains(path) {
            return;
        }
        match self.watcher.lock().watch(path, RecursiveMode::NonRecursive) {
            Ok(()) => {
                debug!(path = %path.display(), "watching file");
                watched.insert(path.to_path_buf());
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to watch file");
            }
        }
    }

    /// Stop observing `path`. Safe to call for paths never watched.
    pub fn unwatch(&self, path: &Path) {
        let mut watched = self.watched.lock();
        if !watched.remove(path) {
            return;
        }
        // Unwatching a deleted path errors on some platforms; the watch is
        // already dead at that point.
        if let Err(err) = self.watcher.lock().unwatch(path) {
            debug!(path = %path.display(), error = %err, "failed to unwatch file");
        } else {
            debug!(path = %path.display(), "unwatched file");
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.watched.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.watched.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    async fn wait_for_event(
        rx: &mut mpsc::Receiver<FsEvent>,
        want: impl Fn(&FsEvent) -> bool,
    ) -> FsEvent {
        loop {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for watch event")
                .expect("watch channel closed");
            if want(&event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_change_event_reaches_channel() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.js");
        std::fs::write(&file, "export const a = 1;").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let watch = WatchSet::new(tx).unwrap();
        watch.watch(&file);
        tokio::time::sleep(Duration::from_millis(100)).await;

        std::fs::write(&file, "export const a = 2;").unwrap();
        wait_for_event(&mut rx, |event| {
            matches!(event, FsEvent::Changed(path) if path == &file)
        })
        .await;
    }

    #[tokio::test]
    async fn test_remove_event_reaches_channel() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.js");
        std::fs::write(&file, "export const a = 1;").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let watch = WatchSet::new(tx).unwrap();
        watch.watch(&file);
        tokio::time::sleep(Duration::from_millis(100)).await;

        std::fs::remove_file(&file).unwrap();
        wait_for_event(&mut rx, |event| {
            matches!(event, FsEvent::Removed(path) if path == &file)
        })
        .await;
    }

    #[test]
    fn test_watch_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.js");
        std::fs::write(&file, "export const a = 1;").unwrap();

        let (tx, _rx) = mpsc::channel(16);
        let watch = WatchSet::new(tx).unwrap();
        watch.watch(&file);
        watch.watch(&file);
        assert_eq!(watch.len(), 1);

        watch.unwatch(&file);
        watch.unwatch(&file);
        assert!(watch.is_empty());
    }

    #[test]
    fn test_watch_missing_path_is_skipped() {
        let (tx, _rx) = mpsc::channel(16);
        let watch = WatchSet::new(tx).unwrap();
        watch.watch(Path::new("/no/such/file.js"));
        assert!(watch.is_empty());
    }
}
