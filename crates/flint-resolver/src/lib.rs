//! Module specifier resolution.
//!
//! Maps raw import specifiers (`./util`, `lodash`, `@scope/pkg/helper`,
//! `virtual:/@client.js`) to absolute file paths on behalf of the transform
//! pipeline. Resolution failures are soft: callers receive `None` and decide
//! how to degrade.

mod package_json;
mod resolve;

pub use resolve::Resolver;

/// Marker prefix for routed specifiers.
///
/// A routed specifier is not a filesystem lookup: the remainder after the
/// marker is emitted verbatim as the import path, letting transforms point
/// at server-internal modules like the browser runtime.
pub const ROUTED_PREFIX: &str = "virtual:";

/// Classification of a raw import specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// `virtual:`-prefixed; payload is the remainder after the marker.
    Routed(&'a str),
    /// Already a URL (`http:`, `https:`, `data:`); left untouched.
    External,
    /// Absolute filesystem path.
    Absolute,
    /// `./` or `../` relative to the importer.
    Relative,
    /// Bare package specifier, subject to aliases and `node_modules` walk.
    Bare,
}

/// Classify a raw specifier without touching the filesystem.
pub fn classify(specifier: &str) -> Resolution<'_> {
    if let Some(rest) = specifier.strip_prefix(ROUTED_PREFIX) {
        return Resolution::Routed(rest);
    }
    if specifier.starts_with("http:")
        || specifier.starts_with("https:")
        || specifier.starts_with("data:")
    {
        return Resolution::External;
    }
    if specifier.starts_with('/') {
        return Resolution::Absolute;
    }
    if specifier.starts_with("./") || specifier.starts_with("../") {
        return Resolution::Relative;
    }
    Resolution::Bare
}
