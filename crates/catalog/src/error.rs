//! Catalog store error types.

use thiserror::Error;

/// Catalog store operation errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The package has never been seen by the mirror.
    #[error("package does not exist: {0}")]
    NotFound(String),

    /// The package row exists but no document has been fetched yet.
    #[error("package has not been mirrored yet: {0}")]
    NotYetMirrored(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema version {found} is newer than supported version {supported}")]
    SchemaVersion { found: i64, supported: i64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for catalog operations.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
