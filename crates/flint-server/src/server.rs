//! Server startup and lifecycle.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use flint_config::ServerOptions;
use flint_pipeline::Plugin;

use crate::context::{ServerContext, SharedContext};
use crate::error::{Result, ServerError};
use crate::routes::router;

/// A running module server: one context plus its HTTP front end.
pub struct ModuleServer {
    context: SharedContext,
}

impl ModuleServer {
    /// Start the server context (plugins, cache, watch loop) without
    /// binding the listen socket yet.
    pub async fn start(
        options: ServerOptions,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Result<Self> {
        let context = ServerContext::start(options, plugins).await?;
        Ok(Self { context })
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// Bind the configured address and serve until interrupted, then run
    /// plugin teardown and flush pending cache writes before returning.
    pub async fn serve(self) -> Result<()> {
        let address = self.context.options().address.to_string();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind {
                address: address.clone(),
                source,
            })?;
        info!(
            address = %self.context.options().address.origin(),
            "module server listening"
        );

        let app = router(self.context.clone());
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "interrupt handler failed");
                }
            })
            .await?;

        self.context.shutdown().await;
        Ok(())
    }
}
