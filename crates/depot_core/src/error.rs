//! Error types for depot_core operations.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for depot_core operations.
///
/// Variants are grouped by the collaborator that failed so callers can tell
/// a ref-db problem from an object-db or pack-writer problem.
#[derive(Error, Debug)]
pub enum DepotError {
    /// Object with the given ID was not found in any pack.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// Hash verification failed during object read.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// The expected object ID
        expected: String,
        /// The actual computed hash
        actual: String,
    },

    /// A pack file is corrupted or has invalid format.
    #[error("corrupt pack {name}: {reason}")]
    CorruptPack {
        /// Name of the pack
        name: String,
        /// Description of the corruption
        reason: String,
    },

    /// A pack index file is corrupted or has invalid format.
    #[error("corrupt pack index {name}: {reason}")]
    CorruptIndex {
        /// Name of the pack
        name: String,
        /// Description of the corruption
        reason: String,
    },

    /// Invalid hex string for ObjectId parsing.
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    /// Serialization error during typed object operations.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error during typed object operations.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// Reference not found.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// Invalid ref file content or format.
    #[error("invalid ref at {}: {}", path.display(), reason)]
    InvalidRef {
        /// Path to the invalid ref file
        path: PathBuf,
        /// Description of what's invalid
        reason: String,
    },

    /// Ref database I/O failure.
    #[error("ref database error: {0}")]
    RefDb(String),

    /// Object database / storage backend failure.
    #[error("object database error: {0}")]
    ObjDb(String),

    /// Pack writer failure.
    #[error("pack writer error: {0}")]
    PackWriter(String),

    /// A fatal precondition was violated before any side effect.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Configuration error (loading, parsing, invalid values).
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Lock file is held by another process.
    #[error("lock unavailable: {}", path.display())]
    LockUnavailable {
        /// Path to the contended lock file
        path: PathBuf,
    },

    /// Operation was cancelled through the progress monitor.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for depot_core operations.
pub type Result<T> = std::result::Result<T, DepotError>;
