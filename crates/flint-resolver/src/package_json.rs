//! Minimal `package.json` reading for directory resolution.

use std::path::Path;
use tracing::warn;

/// Read the `main` field of `<dir>/package.json`, if present and parseable.
///
/// A malformed manifest is treated as absent; directory resolution then falls
/// back to the index file convention.
pub(crate) fn read_main(dir: &Path) -> Option<String> {
    let manifest = dir.join("package.json");
    let text = std::fs::read_to_string(&manifest).ok()?;

    let value: serde_json::Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %manifest.display(), error = %e, "ignoring malformed package.json");
            return None;
        }
    };

    value
        .get("main")
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_main_field() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{ "name": "pkg", "main": "lib/entry.js" }"#,
        )
        .unwrap();
        assert_eq!(read_main(dir.path()), Some("lib/entry.js".to_string()));
    }

    #[test]
    fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_main(dir.path()), None);
    }

    #[test]
    fn test_malformed_manifest_is_absent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), "{ not json").unwrap();
        assert_eq!(read_main(dir.path()), None);
    }

    #[test]
    fn test_main_must_be_string() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{ "main": 42 }"#).unwrap();
        assert_eq!(read_main(dir.path()), None);
    }
}
