//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("invalid tarball path: {0}")]
    InvalidTarballPath(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("document parse error: {0}")]
    DocumentParse(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
