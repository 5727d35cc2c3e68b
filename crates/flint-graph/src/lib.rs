//! Module dependency graph and file watching.
//!
//! Tracks which files import which, keeps the OS watcher aligned with the
//! tracked set, and turns raw filesystem events into targeted invalidation
//! notifications delivered to a [`ChangeSink`].

use std::path::Path;

pub mod coordinator;
pub mod graph;
pub mod watcher;

pub use coordinator::WatchCoordinator;
pub use graph::{DepDiff, DepGraph};
pub use watcher::{FsEvent, WatchSet};

/// Receiver for invalidation notifications.
///
/// Implemented by the server, which purges cache entries and pushes events
/// to connected clients.
pub trait ChangeSink: Send + Sync {
    /// A dependent of a changed file should refresh itself.
    fn notify_change(&self, file: &Path);

    /// A watched file disappeared; clients need a full reload.
    fn notify_unlink(&self, file: &Path);
}
