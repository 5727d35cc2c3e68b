//! Per-file cache metadata.

use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The fingerprint a dependency had when the artifact was produced.
///
/// An empty hash marks a dependency that could not be read at persist time,
/// which guarantees the reuse check fails until the file reappears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepPin {
    pub hash: String,
    pub mtime_ms: u64,
}

impl From<Fingerprint> for DepPin {
    fn from(fp: Fingerprint) -> Self {
        Self {
            hash: fp.hash,
            mtime_ms: fp.mtime_ms,
        }
    }
}

impl DepPin {
    /// Pin for a dependency that was unreadable when the artifact was built.
    pub fn unreadable() -> Self {
        Self {
            hash: String::new(),
            mtime_ms: 0,
        }
    }
}

/// Metadata describing one cached transform artifact.
///
/// Serialized as `<artifact_id>.meta.json` next to the artifact itself.
/// `deps` uses a BTreeMap so the JSON on disk is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    /// Absolute path of the source file.
    pub path: PathBuf,
    /// Stable identifier naming the artifact files on disk.
    pub artifact_id: String,
    /// Fingerprint of the source when the artifact was produced.
    pub hash: String,
    pub mtime_ms: u64,
    /// True when the artifact embeds no server address and can be served
    /// verbatim regardless of the current address.
    pub pure: bool,
    /// True when a source map was emitted alongside the code.
    pub has_map: bool,
    /// True when the module registered a self-accept handler.
    pub hot: bool,
    /// Server address (`host:port`) baked into the artifact's rewritten
    /// import URLs. Empty for pure artifacts.
    pub address: String,
    /// Resolved dependencies and the fingerprints they had at build time.
    pub deps: BTreeMap<PathBuf, DepPin>,
}
