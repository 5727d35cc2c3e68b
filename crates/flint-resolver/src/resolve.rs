//! The resolution algorithm and its memo table.

use crate::{Resolution, classify, package_json};
use dashmap::DashMap;
use path_clean::PathClean;
use rustc_hash::FxHashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolves import specifiers to absolute file paths.
///
/// Successful `(importer dir, specifier)` pairs are memoized for the process
/// lifetime; a hit re-validates that the target still exists and self-evicts
/// otherwise, so deleting a file on disk is observed on the next resolve.
pub struct Resolver {
    extensions: Vec<String>,
    aliases: FxHashMap<String, String>,
    memo: DashMap<(PathBuf, String), PathBuf>,
}

impl Resolver {
    /// Create a resolver with the given extension order and alias map.
    ///
    /// Alias targets are expected to be absolute paths; a matching alias
    /// substitutes the prefix before any `node_modules` walk happens.
    pub fn new(extensions: Vec<String>, aliases: FxHashMap<String, String>) -> Self {
        Self {
            extensions,
            aliases,
            memo: DashMap::new(),
        }
    }

    /// Resolve `specifier` as imported from `importer`.
    ///
    /// Returns `None` when nothing on disk satisfies the specifier. Routed
    /// and external specifiers are never filesystem lookups and also yield
    /// `None`; callers are expected to have classified them already.
    pub fn resolve(&self, importer: &Path, specifier: &str) -> Option<PathBuf> {
        let importer_dir = importer.parent().unwrap_or_else(|| Path::new("/"));
        let key = (importer_dir.to_path_buf(), specifier.to_string());

        if let Some(hit) = self.memo.get(&key) {
            if hit.is_file() {
                return Some(hit.clone());
            }
            drop(hit);
            self.memo.remove(&key);
            debug!(specifier, "memoized resolution went stale; re-resolving");
        }

        let resolved = self.resolve_uncached(importer_dir, specifier);
        match &resolved {
            Some(path) => {
                self.memo.insert(key, path.clone());
            }
            None => {
                debug!(
                    specifier,
                    importer = %importer.display(),
                    "specifier did not resolve"
                );
            }
        }
        resolved
    }

    /// Number of memoized resolutions.
    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    fn resolve_uncached(&self, importer_dir: &Path, specifier: &str) -> Option<PathBuf> {
        match classify(specifier) {
            Resolution::Routed(_) | Resolution::External => None,
            Resolution::Absolute => self.resolve_path(PathBuf::from(specifier)),
            Resolution::Relative => self.resolve_path(importer_dir.join(specifier)),
            Resolution::Bare => self.resolve_bare(importer_dir, specifier),
        }
    }

    /// Try a concrete path: exact file, then extension candidates, then as a
    /// directory.
    fn resolve_path(&self, path: PathBuf) -> Option<PathBuf> {
        let path = path.clean();

        if path.is_file() {
            return Some(path);
        }

        for ext in &self.extensions {
            let candidate = append_extension(&path, ext);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        if path.is_dir() {
            return self.resolve_dir(&path);
        }

        None
    }

    /// Directory resolution: `package.json` main field, then `index` with the
    /// extension list.
    fn resolve_dir(&self, dir: &Path) -> Option<PathBuf> {
        if let Some(main) = package_json::read_main(dir) {
            let target = dir.join(main).clean();
            // A main field pointing at another directory is followed once.
            if target.is_file() {
                return Some(target);
            }
            for ext in &self.extensions {
                let candidate = append_extension(&target, ext);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
            if target.is_dir() {
                if let Some(found) = self.index_in(&target) {
                    return Some(found);
                }
            }
        }

        self.index_in(dir)
    }

    fn index_in(&self, dir: &Path) -> Option<PathBuf> {
        for ext in &self.extensions {
            let candidate = dir.join(format!("index.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// Bare specifier: alias substitution first, then an ascending
    /// `node_modules` walk from the importer's directory.
    fn resolve_bare(&self, importer_dir: &Path, specifier: &str) -> Option<PathBuf> {
        if let Some(substituted) = self.apply_alias(specifier) {
            return match classify(&substituted) {
                Resolution::Absolute => self.resolve_path(PathBuf::from(&substituted)),
                Resolution::Relative => self.resolve_path(importer_dir.join(&substituted)),
                // An alias to another bare name continues the walk under the
                // substituted name; a second substitution is not applied.
                _ => self.walk_node_modules(importer_dir, &substituted),
            };
        }

        self.walk_node_modules(importer_dir, specifier)
    }

    fn apply_alias(&self, specifier: &str) -> Option<String> {
        if let Some(target) = self.aliases.get(specifier) {
            return Some(target.clone());
        }
        for (from, to) in &self.aliases {
            if let Some(rest) = specifier.strip_prefix(from.as_str()) {
                if let Some(rest) = rest.strip_prefix('/') {
                    return Some(format!("{to}/{rest}"));
                }
            }
        }
        None
    }

    fn walk_node_modules(&self, importer_dir: &Path, specifier: &str) -> Option<PathBuf> {
        let (name, subpath) = split_package(specifier);

        for dir in importer_dir.ancestors() {
            let package_dir = dir.join("node_modules").join(name);
            if !package_dir.exists() {
                continue;
            }
            let found = match subpath {
                Some(sub) => self.resolve_path(package_dir.join(sub)),
                None => self.resolve_dir(&package_dir),
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

/// Append an extension without disturbing dots already in the file stem,
/// so `util.test` becomes `util.test.js` rather than `util.js`.
fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_os_string();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

/// Split a bare specifier into package name and optional subpath, keeping
/// `@scope/name` together as the package name.
fn split_package(specifier: &str) -> (&str, Option<&str>) {
    let boundary = if specifier.starts_with('@') {
        // Scoped packages own their first two segments.
        specifier
            .match_indices('/')
            .nth(1)
            .map(|(idx, _)| idx)
    } else {
        specifier.find('/')
    };

    match boundary {
        Some(idx) => (&specifier[..idx], Some(&specifier[idx + 1..])),
        None => (specifier, None),
    }
}
