//! Bidirectional dependency graph.
//!
//! Two adjacency maps are kept in lockstep under one lock: file to its
//! dependency set, and dependency to the files importing it. Every file
//! carries a self edge so its own edits reach the watch pipeline, which is
//! why `set_dependencies(file, [])` still leaves `file` tracked.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Outcome of a dependency-set update, with all lists sorted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DepDiff {
    /// Dependencies added to the file's set.
    pub added: Vec<PathBuf>,
    /// Dependencies dropped from the file's set.
    pub removed: Vec<PathBuf>,
    /// Dropped dependencies whose dependents entry became empty and was
    /// deleted, so nothing needs to observe them anymore.
    pub orphaned: Vec<PathBuf>,
}

#[derive(Default)]
struct GraphInner {
    /// file -> its dependency set, always containing the file itself.
    deps: FxHashMap<PathBuf, FxHashSet<PathBuf>>,
    /// dependency -> files importing it, self edge included.
    dependents: FxHashMap<PathBuf, FxHashSet<PathBuf>>,
    /// Files whose latest artifact registered a self-accept handler.
    hot: FxHashSet<PathBuf>,
}

/// Live view of the module graph, shared across request handlers and the
/// watch loop.
#[derive(Default)]
pub struct DepGraph {
    inner: Mutex<GraphInner>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `file`'s dependency set with `resolved` plus the self edge.
    ///
    /// Both adjacency maps are updated under one lock so no reader ever
    /// observes only half of the change. Dependents entries emptied by the
    /// update are deleted, never left as empty sets.
    pub fn set_dependencies(&self, file: &Path, resolved: &[PathBuf]) -> DepDiff {
        let mut current: FxHashSet<PathBuf> = resolved.iter().cloned().collect();
        current.insert(file.to_path_buf());

        let mut inner = self.inner.lock();
        let previous = inner.deps.get(file).cloned().unwrap_or_default();

        let mut added: Vec<PathBuf> = current.difference(&previous).cloned().collect();
        let mut removed: Vec<PathBuf> = previous.difference(&current).cloned().collect();
        added.sort();
        removed.sort();

        for dep in &added {
            inner
                .dependents
                .entry(dep.clone())
                .or_default()
                .insert(file.to_path_buf());
        }

        let mut orphaned = Vec::new();
        for dep in &removed {
            if let Some(set) = inner.dependents.get_mut(dep) {
                set.remove(file);
                if set.is_empty() {
                    inner.dependents.remove(dep);
                    orphaned.push(dep.clone());
                }
            }
        }

        inner.deps.insert(file.to_path_buf(), current);
        DepDiff {
            added,
            removed,
            orphaned,
        }
    }

    /// Record whether `file`'s latest artifact self-accepts hot updates.
    pub fn set_hot_accepting(&self, file: &Path, hot: bool) {
        let mut inner = self.inner.lock();
        if hot {
            inner.hot.insert(file.to_path_buf());
        } else {
            inner.hot.remove(file);
        }
    }

    pub fn is_hot_accepting(&self, file: &Path) -> bool {
        self.inner.lock().hot.contains(file)
    }

    /// Files to notify when `changed` is written.
    ///
    /// Walks dependents edges breadth-first. A self-accepting module absorbs
    /// the update for its branch; a module nobody imports is a terminal and
    /// is notified itself, which clients answer with a full reload. Untracked
    /// paths produce nothing. When a cycle leaves no terminal at all, the
    /// changed file itself is notified.
    pub fn affected(&self, changed: &Path) -> Vec<PathBuf> {
        let inner = self.inner.lock();
        if !inner.dependents.contains_key(changed) {
            return Vec::new();
        }

        let mut targets = FxHashSet::default();
        let mut visited = FxHashSet::default();
        let mut queue = VecDeque::from([changed.to_path_buf()]);
        visited.insert(changed.to_path_buf());

        while let Some(current) = queue.pop_front() {
            if inner.hot.contains(&current) {
                targets.insert(current);
                continue;
            }
            let importers: Vec<&PathBuf> = inner
                .dependents
                .get(&current)
                .into_iter()
                .flatten()
                .filter(|&importer| importer != &current)
                .collect();
            if importers.is_empty() {
                targets.insert(current);
                continue;
            }
            for importer in importers {
                if visited.insert(importer.clone()) {
                    queue.push_back(importer.clone());
                }
            }
        }

        if targets.is_empty() {
            targets.insert(changed.to_path_buf());
        }
        let mut targets: Vec<PathBuf> = targets.into_iter().collect();
        targets.sort();
        targets
    }

    /// Forget a deleted file.
    ///
    /// Drops the file's own edges and its dependents entry. Other files that
    /// still list it as a dependency keep their records until their next
    /// transform. Returns every path that stopped being tracked, the file
    /// itself included, so the watcher can release them.
    pub fn remove_file(&self, file: &Path) -> Vec<PathBuf> {
        let mut inner = self.inner.lock();
        let mut orphaned = Vec::new();

        if let Some(deps) = inner.deps.remove(file) {
            for dep in deps {
                if dep == file {
                    continue;
                }
                if let Some(set) = inner.dependents.get_mut(&dep) {
                    set.remove(file);
                    if set.is_empty() {
                        inner.dependents.remove(&dep);
                        orphaned.push(dep);
                    }
                }
            }
        }
        if inner.dependents.remove(file).is_some() {
            orphaned.push(file.to_path_buf());
        }
        inner.hot.remove(file);
        orphaned.sort();
        orphaned
    }

    /// Dependency -> dependents mapping, values sorted, for persistence.
    pub fn dependents_snapshot(&self) -> FxHashMap<PathBuf, Vec<PathBuf>> {
        let inner = self.inner.lock();
        inner
            .dependents
            .iter()
            .map(|(dep, files)| {
                let mut files: Vec<PathBuf> = files.iter().cloned().collect();
                files.sort();
                (dep.clone(), files)
            })
            .collect()
    }

    /// Sorted dependents of `path`, self edge included.
    pub fn dependents_of(&self, path: &Path) -> Vec<PathBuf> {
        let inner = self.inner.lock();
        let mut files: Vec<PathBuf> = inner
            .dependents
            .get(path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    /// Sorted dependency set of `file`, self edge included.
    pub fn dependencies_of(&self, file: &Path) -> Vec<PathBuf> {
        let inner = self.inner.lock();
        let mut files: Vec<PathBuf> = inner
            .deps
            .get(file)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    /// Whether anything (itself included) depends on `path`.
    pub fn is_tracked(&self, path: &Path) -> bool {
        self.inner.lock().dependents.contains_key(path)
    }
}
