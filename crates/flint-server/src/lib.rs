//! HTTP front end for the flint module pipeline.
//!
//! One [`ServerContext`] per instance owns the plugin set, the transform
//! processor, the artifact cache, the dependency graph with its watch
//! loop, and the connected browsers. The HTTP surface stays small: a
//! module endpoint serving transformed JavaScript, a companion source-map
//! endpoint, a resolve endpoint for runtime dynamic imports, the browser
//! runtime itself, and an SSE stream pushing `change` and `unlink`
//! notifications.
//!
//! ```no_run
//! use flint_config::ServerOptions;
//! use flint_server::ModuleServer;
//!
//! # async fn run() -> flint_server::Result<()> {
//! let server = ModuleServer::start(ServerOptions::new("/project"), Vec::new()).await?;
//! server.serve().await
//! # }
//! ```

pub mod context;
pub mod error;
pub mod events;
pub mod routes;
pub mod server;

pub use context::{ServedModule, ServerContext, SharedContext};
pub use error::{Result, ServerError};
pub use events::{ChangeEvent, ClientHub};
pub use routes::router;
pub use server::ModuleServer;
