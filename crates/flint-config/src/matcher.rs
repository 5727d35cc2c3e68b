//! Path filtering for watch registration and source-map generation.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Include/exclude matcher over file paths.
///
/// Patterns are deliberately simple: `*.ext` matches by suffix, anything else
/// matches as a path segment substring. This mirrors what dev tooling needs in
/// practice without pulling glob semantics into hot paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathMatcher {
    /// Extensions the matcher accepts; empty means any extension.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Patterns that reject a path outright.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl PathMatcher {
    /// Matcher that accepts everything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Matcher with exclude patterns only.
    pub fn excluding(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            extensions: Vec::new(),
            exclude: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Restrict accepted extensions (without the leading dot).
    pub fn with_extensions(mut self, exts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extensions = exts.into_iter().map(Into::into).collect();
        self
    }

    /// Check whether a path passes the matcher.
    pub fn matches(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();

        for pattern in &self.exclude {
            if let Some(suffix) = pattern.strip_prefix('*') {
                if path_str.ends_with(suffix) {
                    return false;
                }
            } else if path_str.contains(&format!("/{pattern}/"))
                || path_str.ends_with(&format!("/{pattern}"))
            {
                return false;
            }
        }

        if self.extensions.is_empty() {
            return true;
        }

        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_any_matches_everything() {
        let m = PathMatcher::any();
        assert!(m.matches(&PathBuf::from("/project/src/app.js")));
        assert!(m.matches(&PathBuf::from("/project/readme.md")));
    }

    #[test]
    fn test_segment_exclude() {
        let m = PathMatcher::excluding(["node_modules", ".git"]);
        assert!(!m.matches(&PathBuf::from("/project/node_modules/lodash/index.js")));
        assert!(!m.matches(&PathBuf::from("/project/.git/config")));
        assert!(m.matches(&PathBuf::from("/project/src/app.js")));
    }

    #[test]
    fn test_suffix_exclude() {
        let m = PathMatcher::excluding(["*.log"]);
        assert!(!m.matches(&PathBuf::from("/project/debug.log")));
        assert!(m.matches(&PathBuf::from("/project/src/app.js")));
    }

    #[test]
    fn test_extension_restriction() {
        let m = PathMatcher::any().with_extensions(["js", "mjs"]);
        assert!(m.matches(&PathBuf::from("/project/src/app.js")));
        assert!(!m.matches(&PathBuf::from("/project/styles/site.css")));
        assert!(!m.matches(&PathBuf::from("/project/Makefile")));
    }

    #[test]
    fn test_exclude_wins_over_extension() {
        let m = PathMatcher::excluding(["node_modules"]).with_extensions(["js"]);
        assert!(!m.matches(&PathBuf::from("/p/node_modules/a/index.js")));
    }
}
