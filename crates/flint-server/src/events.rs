//! Change notifications pushed to connected browsers.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One message on the event stream.
///
/// `Change` names the dependent file that should refresh itself; the
/// client decides between a hot re-import and a full reload. `Unlink`
/// carries no target because a deleted file leaves nothing to hot-swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeEvent {
    Change { file: PathBuf },
    Unlink,
}

/// Registry of connected event-stream clients.
///
/// Each client owns the receiving half of a bounded channel. `broadcast`
/// is synchronous so the watch loop can call it without an executor handle.
#[derive(Default)]
pub struct ClientHub {
    clients: RwLock<HashMap<usize, mpsc::Sender<String>>>,
    next_id: RwLock<usize>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client, returning its id and the message receiver.
    pub fn register(&self) -> (usize, mpsc::Receiver<String>) {
        let mut next_id = self.next_id.write();
        let id = *next_id;
        *next_id += 1;
        let (tx, rx) = mpsc::channel(100);
        self.clients.write().insert(id, tx);
        debug!(client = id, "event stream client connected");
        (id, rx)
    }

    /// Drop a client from the registry.
    pub fn unregister(&self, id: usize) {
        if self.clients.write().remove(&id).is_some() {
            debug!(client = id, "event stream client disconnected");
        }
    }

    /// Send `event` to every connected client.
    ///
    /// A client whose channel has closed is unregistered; a client whose
    /// channel is full has the event dropped.
    pub fn broadcast(&self, event: &ChangeEvent) {
        let message = match serde_json::to_string(event) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "change event failed to serialize");
                return;
            }
        };
        let clients = self.clients.read().clone();
        let mut closed = Vec::new();
        for (id, tx) in &clients {
            match tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client = id, "event stream client is not draining, dropping event");
                }
            }
        }
        for id in closed {
            self.unregister(id);
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }
}
