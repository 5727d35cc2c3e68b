//! Content fingerprints for change detection.
//!
//! A fingerprint pairs a BLAKE3 content hash with the file's mtime in integer
//! milliseconds. Reuse checks compare mtime first (cheap) and fall back to
//! the hash, so editors that rewrite files without content changes do not
//! force re-transforms.

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Content hash plus mtime for a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// BLAKE3 hash of the file contents, lowercase hex.
    pub hash: String,
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime_ms: u64,
}

impl Fingerprint {
    /// Capture the current fingerprint of a file on disk.
    pub fn capture(path: &Path) -> io::Result<Self> {
        Ok(Self {
            hash: hash_file(path)?,
            mtime_ms: mtime_millis(path)?,
        })
    }
}

/// Compute the BLAKE3 hash of a file's contents as lowercase hex.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let contents = std::fs::read(path)?;
    Ok(hash_bytes(&contents))
}

/// Compute the BLAKE3 hash of a byte slice as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize().to_hex().to_string()
}

/// File mtime in milliseconds since the Unix epoch.
///
/// Pre-epoch mtimes collapse to zero, which only ever forces the hash path.
pub fn mtime_millis(path: &Path) -> io::Result<u64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_is_stable_for_same_bytes() {
        assert_eq!(hash_bytes(b"const x = 1;"), hash_bytes(b"const x = 1;"));
        assert_ne!(hash_bytes(b"const x = 1;"), hash_bytes(b"const x = 2;"));
    }

    #[test]
    fn test_hash_is_hex() {
        let hash = hash_bytes(b"anything");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_capture_matches_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.js");
        std::fs::write(&path, "export const a = 1;").unwrap();

        let fp = Fingerprint::capture(&path).unwrap();
        assert_eq!(fp.hash, hash_bytes(b"export const a = 1;"));
        assert!(fp.mtime_ms > 0);
    }

    #[test]
    fn test_capture_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        assert!(Fingerprint::capture(&dir.path().join("missing.js")).is_err());
    }
}
