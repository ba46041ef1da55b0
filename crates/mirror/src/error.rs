//! Mirror engine error types.

use thiserror::Error;

/// Mirror engine operation errors.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("invalid registry URL: {0}")]
    InvalidRegistry(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} for {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("catalog error: {0}")]
    Catalog(#[from] pantry_catalog::CatalogError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for mirror operations.
pub type MirrorResult<T> = std::result::Result<T, MirrorError>;
