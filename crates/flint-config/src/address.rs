//! Server address and module URL construction.
//!
//! Transformed artifacts reference sibling modules by absolute request URL,
//! so the address a file was transformed under is part of its cached bytes.
//! All URL building goes through this type to keep the forms consistent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Host and port the server is reachable at.
///
/// The string form (`host:port`) is what cache metadata records; the
/// `origin()` form (`http://host:port`) is what gets baked into rewritten
/// import specifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddr {
    /// Host name or IP the server binds to
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl ServerAddr {
    /// Create a new server address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The HTTP origin, e.g. `http://127.0.0.1:3000`.
    pub fn origin(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// URL that serves the transformed module for an absolute file path.
    pub fn module_url(&self, path: &Path) -> String {
        format!(
            "{}/@module?{}",
            self.origin(),
            encode_query("path", &path.to_string_lossy())
        )
    }

    /// URL that serves the source map companion for an absolute file path.
    pub fn map_url(&self, path: &Path) -> String {
        format!(
            "{}/@module.map?{}",
            self.origin(),
            encode_query("path", &path.to_string_lossy())
        )
    }

    /// URL for the synthetic module served in place of an unresolvable import.
    ///
    /// Evaluating that module logs a diagnostic in the browser instead of
    /// breaking every sibling import of the requesting file.
    pub fn unresolved_url(&self, specifier: &str, importer: &Path) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("specifier", specifier)
            .append_pair("importer", &importer.to_string_lossy())
            .finish();
        format!("{}/@unresolved?{}", self.origin(), query)
    }

    /// URL of the embedded browser runtime.
    pub fn client_url(&self) -> String {
        format!("{}/@client.js", self.origin())
    }

    /// URL of the SSE change-notification stream.
    pub fn events_url(&self) -> String {
        format!("{}/@events", self.origin())
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Default for ServerAddr {
    fn default() -> Self {
        Self::new("127.0.0.1", 3000)
    }
}

fn encode_query(key: &str, value: &str) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair(key, value)
        .finish()
}
