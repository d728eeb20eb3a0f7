//! Error types for reference operations.

use thiserror::Error;

/// Errors that can occur during reference operations.
#[derive(Debug, Error)]
pub enum RefError {
    /// The reference name is invalid.
    #[error("invalid ref name: {name}: {reason}")]
    InvalidRefName { name: String, reason: String },

    /// A loose or packed ref file could not be parsed.
    #[error("malformed ref {name}: {reason}")]
    Malformed { name: String, reason: String },

    /// Symbolic refs nest deeper than the resolution limit, or loop.
    #[error("symbolic ref {name} nests too deeply")]
    SymrefTooDeep { name: String },

    /// The in-memory store's lock was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    Poisoned(String),

    /// I/O error during file-based ref operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for ref operations.
pub type Result<T> = std::result::Result<T, RefError>;
