//! HTTP surface of the module server.
//!
//! Everything lives under `/@`-prefixed routes so transformed modules can
//! import them without colliding with project files. The full route table:
//!
//! - `/@module?path=` transformed JavaScript for an absolute source path
//! - `/@module.map?path=` companion source map
//! - `/@resolve?specifier=&importer=` specifier resolution as plain text
//! - `/@unresolved?specifier=&importer=` stub for imports that never resolved
//! - `/@client.js` browser runtime (hot handles, import interop)
//! - `/@events` SSE stream of change and unlink notifications

use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::context::SharedContext;

const JS_CONTENT_TYPE: &str = "text/javascript";
const CLIENT_RUNTIME: &str = include_str!("../assets/client.js");

/// Build the router for one server context.
///
/// CORS is wide open; the server speaks to pages served from anywhere
/// during development.
pub fn router(context: SharedContext) -> Router {
    Router::new()
        .route("/@module", get(handle_module))
        .route("/@module.map", get(handle_module_map))
        .route("/@resolve", get(handle_resolve))
        .route("/@unresolved", get(handle_unresolved))
        .route("/@client.js", get(handle_client))
        .route("/@events", get(handle_events))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(context)
}

#[derive(Debug, Deserialize)]
struct ModuleQuery {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ResolveQuery {
    specifier: String,
    importer: PathBuf,
}

#[derive(Debug, Deserialize)]
struct UnresolvedQuery {
    specifier: String,
    importer: String,
}

/// Serve the transformed module for an absolute source path.
///
/// When a source map exists, the `sourceMappingURL` trailer pointing at
/// the companion endpoint is appended at serve time; stored artifacts
/// never contain it.
async fn handle_module(
    State(context): State<SharedContext>,
    Query(query): Query<ModuleQuery>,
) -> Response {
    let served = context.module(&query.path).await;
    let mut code = served.code;
    if served.map.is_some() {
        let map_url = context.options().address.map_url(&query.path);
        code.push_str(&format!("\n//# sourceMappingURL={map_url}\n"));
    }
    js_response(code)
}

async fn handle_module_map(
    State(context): State<SharedContext>,
    Query(query): Query<ModuleQuery>,
) -> Response {
    match context.module(&query.path).await.map {
        Some(map) => (
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            map,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Resolve a specifier from an importer, answering with the absolute path
/// as plain text, or 404 when nothing matches.
async fn handle_resolve(
    State(context): State<SharedContext>,
    Query(query): Query<ResolveQuery>,
) -> Response {
    match context
        .processor()
        .resolve(&query.importer, &query.specifier)
        .await
    {
        Ok(Some(path)) => (
            [(header::CONTENT_TYPE, "text/plain")],
            path.to_string_lossy().into_owned(),
        )
            .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            warn!(specifier = %query.specifier, error = %err, "resolve endpoint failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// Stub module served in place of an import that never resolved.
///
/// Evaluating it logs the failure instead of throwing, and it carries a
/// default export so default imports of the stub still link.
async fn handle_unresolved(Query(query): Query<UnresolvedQuery>) -> Response {
    let message = serde_json::Value::String(format!(
        "[flint] failed to resolve \"{}\" imported by {}",
        query.specifier, query.importer
    ));
    js_response(format!(
        "console.error({message});\nexport default undefined;\n"
    ))
}

async fn handle_client() -> Response {
    js_response(CLIENT_RUNTIME.to_string())
}

/// Open the change-notification stream for one browser tab.
///
/// One SSE message per affected dependent; keep-alive comments go out
/// every 15 seconds while the stream is idle.
async fn handle_events(
    State(context): State<SharedContext>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let (_id, rx) = context.clients().register();
    let stream = ReceiverStream::new(rx).map(|data| Ok(Event::default().data(data)));
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn js_response(code: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, JS_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        code,
    )
        .into_response()
}
