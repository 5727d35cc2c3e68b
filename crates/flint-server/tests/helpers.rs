//! Shared fixtures for flint-server integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use flint_config::ServerOptions;
use flint_server::{ChangeEvent, ServerContext, SharedContext};

/// Write a project file, creating parent directories as needed.
pub fn write_file(root: &Path, name: &str, contents: &str) -> PathBuf {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    path
}

/// Start a context over `root` with default options and no extra plugins.
pub async fn start_context(root: &Path) -> SharedContext {
    ServerContext::start(ServerOptions::new(root), Vec::new())
        .await
        .expect("context failed to start")
}

/// Give the OS watcher a moment to register freshly tracked paths before
/// the test mutates them.
pub async fn settle_watcher() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

/// Receive stream messages until one parses to an event matching `want`,
/// failing after five seconds. Unrelated events are skipped, so tests stay
/// robust against platform-specific extra filesystem notifications.
pub async fn wait_for_event(
    rx: &mut mpsc::Receiver<String>,
    want: impl Fn(&ChangeEvent) -> bool,
) -> ChangeEvent {
    loop {
        let message = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a change event")
            .expect("event channel closed");
        let event: ChangeEvent = serde_json::from_str(&message).expect("malformed event");
        if want(&event) {
            return event;
        }
    }
}
