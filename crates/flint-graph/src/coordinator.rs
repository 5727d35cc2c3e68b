//! Watch-driven invalidation.

use crate::ChangeSink;
use crate::graph::DepGraph;
use crate::watcher::{FsEvent, WatchSet};
use flint_config::PathMatcher;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Connects the dependency graph to the OS watcher and fans change events
/// out to a [`ChangeSink`].
pub struct WatchCoordinator {
    graph: Arc<DepGraph>,
    watch: WatchSet,
    filter: PathMatcher,
    debounce: Duration,
}

impl WatchCoordinator {
    /// Build the coordinator and its event channel. The caller spawns
    /// [`WatchCoordinator::run`] with the returned receiver.
    pub fn new(
        graph: Arc<DepGraph>,
        filter: PathMatcher,
        debounce: Duration,
    ) -> notify::Result<(Self, mpsc::Receiver<FsEvent>)> {
        let (tx, rx) = mpsc::channel(100);
        let watch = WatchSet::new(tx)?;
        Ok((
            Self {
                graph,
                watch,
                filter,
                debounce,
            },
            rx,
        ))
    }

    /// Record a file's current dependency set and adjust watches.
    ///
    /// Graph tracking is unconditional; the include/exclude filter only
    /// gates OS-level watch registration, so excluded paths (say, inside
    /// `node_modules`) still participate in purge cascades.
    pub fn update_dependencies(&self, file: &Path, resolved: &[PathBuf]) {
        let diff = self.graph.set_dependencies(file, resolved);
        for added in &diff.added {
            if self.filter.matches(added) {
                self.watch.watch(added);
            }
        }
        for orphan in &diff.orphaned {
            self.watch.unwatch(orphan);
        }
    }

    /// Record whether a module's latest artifact self-accepts updates.
    pub fn set_hot_accepting(&self, file: &Path, hot: bool) {
        self.graph.set_hot_accepting(file, hot);
    }

    pub fn graph(&self) -> &DepGraph {
        &self.graph
    }

    pub fn watch_set(&self) -> &WatchSet {
        &self.watch
    }

    /// Consume watcher events until the channel closes.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<FsEvent>, sink: Arc<dyn ChangeSink>) {
        let mut last_fired: FxHashMap<PathBuf, Instant> = FxHashMap::default();
        while let Some(event) = rx.recv().await {
            self.dispatch(&mut last_fired, event, sink.as_ref());
        }
        debug!("watch event channel closed");
    }

    /// Handle one event. Only the first event for a path inside the
    /// debounce window fires; editors that write several times per save
    /// collapse to a single notify cycle.
    fn dispatch(
        &self,
        last_fired: &mut FxHashMap<PathBuf, Instant>,
        event: FsEvent,
        sink: &dyn ChangeSink,
    ) {
        let now = Instant::now();
        if let Some(previous) = last_fired.get(event.path()) {
            if now.duration_since(*previous) < self.debounce {
                trace!(path = %event.path().display(), "debounced file event");
                return;
            }
        }
        last_fired.insert(event.path().to_path_buf(), now);

        match event {
            FsEvent::Changed(path) => {
                let affected = self.graph.affected(&path);
                debug!(
                    path = %path.display(),
                    affected = affected.len(),
                    "file changed"
                );
                for target in &affected {
                    sink.notify_change(target);
                }
            }
            FsEvent::Removed(path) => {
                debug!(path = %path.display(), "file removed");
                for orphan in self.graph.remove_file(&path) {
                    self.watch.unwatch(&orphan);
                }
                sink.notify_unlink(&path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        changes: Mutex<Vec<PathBuf>>,
        unlinks: Mutex<Vec<PathBuf>>,
    }

    impl ChangeSink for RecordingSink {
        fn notify_change(&self, file: &Path) {
            self.changes.lock().push(file.to_path_buf());
        }

        fn notify_unlink(&self, file: &Path) {
            self.unlinks.lock().push(file.to_path_buf());
        }
    }

    fn coordinator(filter: PathMatcher) -> WatchCoordinator {
        let (coordinator, _rx) =
            WatchCoordinator::new(Arc::new(DepGraph::new()), filter, Duration::from_millis(50))
                .unwrap();
        coordinator
    }

    #[test]
    fn test_update_dependencies_watches_new_deps() {
        let dir = TempDir::new().unwrap();
        let index = dir.path().join("index.js");
        let util = dir.path().join("util.js");
        std::fs::write(&index, "import './util.js';").unwrap();
        std::fs::write(&util, "export const u = 1;").unwrap();

        let coordinator = coordinator(PathMatcher::any());
        coordinator.update_dependencies(&index, &[util.clone()]);

        assert!(coordinator.watch_set().contains(&index));
        assert!(coordinator.watch_set().contains(&util));
    }

    #[test]
    fn test_excluded_paths_tracked_but_not_watched() {
        let dir = TempDir::new().unwrap();
        let index = dir.path().join("index.js");
        let pkg_dir = dir.path().join("node_modules/lodash");
        std::fs::create_dir_all(&pkg_dir).unwrap();
        let pkg = pkg_dir.join("index.js");
        std::fs::write(&index, "import 'lodash';").unwrap();
        std::fs::write(&pkg, "export default {};").unwrap();

        let coordinator = coordinator(PathMatcher::excluding(["node_modules"]));
        coordinator.update_dependencies(&index, &[pkg.clone()]);

        assert!(coordinator.graph().is_tracked(&pkg));
        assert!(!coordinator.watch_set().contains(&pkg));
    }

    #[test]
    fn test_dropped_deps_are_unwatched() {
        let dir = TempDir::new().unwrap();
        let index = dir.path().join("index.js");
        let util = dir.path().join("util.js");
        std::fs::write(&index, "import './util.js';").unwrap();
        std::fs::write(&util, "export const u = 1;").unwrap();

        let coordinator = coordinator(PathMatcher::any());
        coordinator.update_dependencies(&index, &[util.clone()]);
        assert!(coordinator.watch_set().contains(&util));

        coordinator.update_dependencies(&index, &[]);
        assert!(!coordinator.watch_set().contains(&util));
        assert!(!coordinator.graph().is_tracked(&util));
    }

    #[test]
    fn test_dispatch_debounces_same_path() {
        let util = PathBuf::from("/app/util.js");
        let coordinator = coordinator(PathMatcher::any());
        coordinator.graph().set_dependencies(&util, &[]);

        let sink = RecordingSink::default();
        let mut last_fired = FxHashMap::default();
        coordinator.dispatch(&mut last_fired, FsEvent::Changed(util.clone()), &sink);
        coordinator.dispatch(&mut last_fired, FsEvent::Changed(util.clone()), &sink);
        assert_eq!(sink.changes.lock().len(), 1);

        std::thread::sleep(Duration::from_millis(60));
        coordinator.dispatch(&mut last_fired, FsEvent::Changed(util.clone()), &sink);
        assert_eq!(sink.changes.lock().len(), 2);
    }

    #[test]
    fn test_dispatch_change_notifies_dependents() {
        let index = PathBuf::from("/app/index.js");
        let util = PathBuf::from("/app/util.js");
        let coordinator = coordinator(PathMatcher::any());
        coordinator.graph().set_dependencies(&index, &[util.clone()]);

        let sink = RecordingSink::default();
        let mut last_fired = FxHashMap::default();
        coordinator.dispatch(&mut last_fired, FsEvent::Changed(util.clone()), &sink);
        assert_eq!(*sink.changes.lock(), vec![index.clone()]);
    }

    #[test]
    fn test_dispatch_removal_notifies_unlink() {
        let index = PathBuf::from("/app/index.js");
        let util = PathBuf::from("/app/util.js");
        let coordinator = coordinator(PathMatcher::any());
        coordinator.graph().set_dependencies(&index, &[util.clone()]);

        let sink = RecordingSink::default();
        let mut last_fired = FxHashMap::default();
        coordinator.dispatch(&mut last_fired, FsEvent::Removed(util.clone()), &sink);

        assert_eq!(*sink.unlinks.lock(), vec![util.clone()]);
        assert!(!coordinator.graph().is_tracked(&util));
    }
}
