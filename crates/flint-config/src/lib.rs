//! Configuration types for the flint module server.
//!
//! Provides the server options struct, the server address with its URL
//! builders, and the path matchers used for watch and source-map filtering.

pub mod address;
pub mod matcher;
pub mod options;

pub use address::ServerAddr;
pub use matcher::PathMatcher;
pub use options::ServerOptions;
