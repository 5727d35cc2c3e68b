//! Serve a project directory as ES modules.
//!
//! ```text
//! cargo run --example serve -- /path/to/project
//! ```
//!
//! Then load modules as `http://127.0.0.1:3000/@module?path=<absolute path>`.

use anyhow::Result;
use flint_config::ServerOptions;
use flint_server::ModuleServer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).compact())
        .init();

    let root = match std::env::args().nth(1) {
        Some(root) => std::path::PathBuf::from(root),
        None => std::env::current_dir()?,
    };
    let root = root.canonicalize()?;

    let server = ModuleServer::start(ServerOptions::new(root), Vec::new()).await?;
    server.serve().await?;
    Ok(())
}
