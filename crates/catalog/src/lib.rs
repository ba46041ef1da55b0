//! Persistent package catalog for the pantry registry mirror.
//!
//! The catalog records everything the mirror knows about upstream:
//! package identity and revision, completion marks, verbatim document
//! bodies, per-tarball records, and the global change sequence. Two
//! backends exist — embedded SQLite and PostgreSQL — behind the
//! [`CatalogStore`] trait, plus an orthogonal read cache.

pub mod cache;
pub mod error;
pub mod models;
pub mod postgres;
pub mod store;

pub use cache::CachedCatalog;
pub use error::{CatalogError, CatalogResult};
pub use models::{
    CatalogStats, CompletedPackage, DistRecord, PackageDocument, PackageRef, PendingPackage,
};
pub use postgres::PostgresCatalog;
pub use store::{CatalogStore, SqliteCatalog};

use pantry_core::config::{DatabaseConfig, DatabaseDriver};
use std::sync::Arc;

/// Create a catalog store from configuration, wrapped in the
/// configured read cache.
pub async fn from_config(config: &DatabaseConfig) -> CatalogResult<Arc<dyn CatalogStore>> {
    let inner: Arc<dyn CatalogStore> = match config.driver {
        DatabaseDriver::Sqlite => Arc::new(SqliteCatalog::new(&config.path).await?),
        DatabaseDriver::Postgres => {
            if config.source.is_empty() {
                return Err(CatalogError::Config(
                    "postgres driver requires 'source' to be a connection URL".to_string(),
                ));
            }
            Arc::new(PostgresCatalog::from_url(&config.source, 10).await?)
        }
    };

    Ok(Arc::new(CachedCatalog::new(
        inner,
        config.max_cache_size,
        config.cache_lifetime,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_sqlite() {
        let temp = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: temp.path().join("catalog.db"),
            ..Default::default()
        };
        let catalog = from_config(&config).await.unwrap();
        assert!(!catalog.is_initialized().await.unwrap());
        catalog.init().await.unwrap();
        assert!(catalog.is_initialized().await.unwrap());
    }

    #[tokio::test]
    async fn test_from_config_postgres_requires_source() {
        let config = DatabaseConfig {
            driver: DatabaseDriver::Postgres,
            ..Default::default()
        };
        assert!(from_config(&config).await.is_err());
    }
}
