//! Per-instance server state and the module request flow.
//!
//! One [`ServerContext`] owns everything a running server needs: options,
//! the plugin set, the transform processor, the artifact cache, the
//! dependency graph with its watch loop, and the connected event-stream
//! clients. Contexts are independent; two in one process share nothing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use flint_cache::{CacheStore, NewArtifact};
use flint_config::ServerOptions;
use flint_graph::{ChangeSink, DepGraph, WatchCoordinator};
use flint_pipeline::{
    PipelineError, Plugin, PluginContainer, TransformProcessor, TransformResult,
};

use crate::error::Result;
use crate::events::{ChangeEvent, ClientHub};

/// Shared handle to one running server instance.
pub type SharedContext = Arc<ServerContext>;

/// Code and companion source map produced for one module request.
#[derive(Debug)]
pub struct ServedModule {
    pub code: String,
    pub map: Option<String>,
}

pub struct ServerContext {
    options: Arc<ServerOptions>,
    processor: TransformProcessor,
    cache: CacheStore,
    coordinator: Arc<WatchCoordinator>,
    clients: ClientHub,
}

impl ServerContext {
    /// Build a context and start its watch loop.
    ///
    /// Runs plugin `setup`, opens the artifact cache (purging entries whose
    /// source file vanished since the last run), and reseeds the dependency
    /// graph from the surviving cache metadata so watches exist before the
    /// first request arrives.
    pub async fn start(
        options: ServerOptions,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Result<SharedContext> {
        let options = Arc::new(options);
        let plugins = Arc::new(PluginContainer::with_defaults(plugins));
        plugins.setup(&options).await?;

        let cache = CacheStore::open(&options.cache_dir(), &plugins.cache_fingerprint())?;
        let dropped = cache.verify_all()?;
        if dropped > 0 {
            info!(dropped, "dropped cache entries for missing sources");
        }

        let graph = Arc::new(DepGraph::new());
        let (coordinator, events) =
            WatchCoordinator::new(graph, options.watch.clone(), options.debounce())?;
        let coordinator = Arc::new(coordinator);
        for meta in cache.entries() {
            let deps: Vec<PathBuf> = meta.deps.keys().cloned().collect();
            coordinator.update_dependencies(&meta.path, &deps);
            coordinator.set_hot_accepting(&meta.path, meta.hot);
        }

        let processor = TransformProcessor::new(options.clone(), plugins);
        let context = Arc::new(Self {
            options,
            processor,
            cache,
            coordinator: coordinator.clone(),
            clients: ClientHub::new(),
        });

        let sink: Arc<dyn ChangeSink> = context.clone();
        tokio::spawn(coordinator.run(events, sink));
        info!(
            root = %context.options.root.display(),
            cached = context.cache.len(),
            "server context ready"
        );
        Ok(context)
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn processor(&self) -> &TransformProcessor {
        &self.processor
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn graph(&self) -> &DepGraph {
        self.coordinator.graph()
    }

    pub fn clients(&self) -> &ClientHub {
        &self.clients
    }

    /// Produce the module for `path`, from cache when fingerprints allow.
    ///
    /// Transform failures degrade to a synthetic module whose entire body
    /// is one console-error statement. Those are served but never cached,
    /// so the next request retries the real transform.
    pub async fn module(&self, path: &Path) -> ServedModule {
        match self.serve_cached(path) {
            Some(served) => served,
            None => self.transform_and_persist(path).await,
        }
    }

    fn serve_cached(&self, path: &Path) -> Option<ServedModule> {
        let meta = match self.cache.should_reuse(path) {
            Ok(meta) => meta?,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cache check failed");
                return None;
            }
        };
        let address = self.options.address.to_string();
        let artifact = match self.cache.load_artifact(path, &address) {
            Ok(artifact) => artifact?,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cached artifact unreadable");
                return None;
            }
        };

        // A hit still refreshes the graph; files must stay watched even
        // when they never re-transform.
        let deps: Vec<PathBuf> = meta.deps.keys().cloned().collect();
        self.coordinator.update_dependencies(path, &deps);
        self.coordinator.set_hot_accepting(path, meta.hot);
        debug!(path = %path.display(), "serving cached artifact");
        Some(ServedModule {
            code: artifact.code,
            map: artifact.map,
        })
    }

    async fn transform_and_persist(&self, path: &Path) -> ServedModule {
        let result = match self.processor.transform(path).await {
            Ok(result) => result,
            Err(err) => {
                error!(path = %path.display(), "{}", err.diagnostic());
                return ServedModule {
                    code: error_module(&err, path),
                    map: None,
                };
            }
        };
        let TransformResult {
            code,
            map,
            imports,
            had_unresolved,
            hot_accepting,
        } = result;

        self.coordinator.update_dependencies(path, &imports);
        self.coordinator.set_hot_accepting(path, hot_accepting);

        let persisted = self.cache.persist(NewArtifact {
            path: path.to_path_buf(),
            code: code.clone(),
            map: map.clone(),
            imports,
            had_unresolved,
            hot: hot_accepting,
            address: self.options.address.to_string(),
        });
        match persisted {
            Ok(_) => {
                let snapshot = self.coordinator.graph().dependents_snapshot();
                if let Err(err) = self.cache.record_dependents(snapshot) {
                    warn!(error = %err, "failed to persist dependents index");
                }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to persist artifact");
            }
        }

        ServedModule { code, map }
    }

    /// Run plugin teardown and flush pending cache writes.
    pub async fn shutdown(&self) {
        if let Err(err) = self.processor.plugins().stop().await {
            warn!(error = %err, "plugin stop failed");
        }
        self.cache.drain().await;
        info!("server context shut down");
    }
}

impl ChangeSink for ServerContext {
    fn notify_change(&self, file: &Path) {
        self.clients.broadcast(&ChangeEvent::Change {
            file: file.to_path_buf(),
        });
    }

    fn notify_unlink(&self, file: &Path) {
        match self.cache.purge(file) {
            Ok(purged) if !purged.is_empty() => {
                debug!(path = %file.display(), purged = purged.len(), "purged after unlink");
            }
            Ok(_) => {}
            Err(err) => {
                warn!(path = %file.display(), error = %err, "purge after unlink failed");
            }
        }
        self.clients.broadcast(&ChangeEvent::Unlink);
    }
}

/// Body served for a failed transform: one console-error statement.
fn error_module(err: &PipelineError, path: &Path) -> String {
    let message = match err {
        PipelineError::Load { source, .. }
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            format!("{} does not exist", path.display())
        }
        _ => err.diagnostic(),
    };
    let text = serde_json::Value::String(format!("[flint] {message}"));
    format!("console.error({text});\n")
}
