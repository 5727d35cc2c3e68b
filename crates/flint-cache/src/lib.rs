//! Persistent transform cache.
//!
//! Caches transformed module artifacts between server runs so unchanged files
//! skip the pipeline entirely. Validity is decided by content fingerprints
//! (BLAKE3 hash plus mtime) of a file *and* of every dependency it imported
//! at transform time. The on-disk layout is a human-readable flat-file
//! directory; error artifacts are never persisted.

pub mod error;
pub mod fingerprint;
pub mod meta;
pub mod store;

pub use error::{CacheError, Result};
pub use fingerprint::{Fingerprint, hash_bytes, hash_file, mtime_millis};
pub use meta::{DepPin, FileMeta};
pub use store::{CacheStore, LoadedArtifact, NewArtifact};
