//! PostgreSQL catalog backend.

use crate::error::{CatalogError, CatalogResult};
use crate::models::{
    CatalogStats, CompletedPackage, DistRecord, PackageDocument, PackageRef, PendingPackage,
};
use crate::store::{CatalogStore, SCHEMA_VERSION};
use async_trait::async_trait;
use pantry_core::INGEST_BATCH_SIZE;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::collections::HashMap;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS globals (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS packages (
    name      TEXT PRIMARY KEY,
    revision  TEXT NOT NULL DEFAULT '',
    document  TEXT NOT NULL DEFAULT '',
    completed BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX IF NOT EXISTS idx_packages_completed ON packages(completed);

CREATE TABLE IF NOT EXISTS package_dists (
    package_name TEXT NOT NULL REFERENCES packages(name) ON DELETE CASCADE,
    hash         TEXT NOT NULL,
    path         TEXT NOT NULL,
    downloaded   BOOLEAN NOT NULL DEFAULT FALSE,
    PRIMARY KEY (package_name, hash, path)
);

CREATE INDEX IF NOT EXISTS idx_package_dists_downloaded ON package_dists(downloaded);
"#;

/// PostgreSQL rejects multiple statements in one prepared statement,
/// so the schema is split and executed piecewise.
fn schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            (!trimmed.is_empty()).then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-backed catalog.
pub struct PostgresCatalog {
    pool: Pool<Postgres>,
}

impl PostgresCatalog {
    /// Connect to a PostgreSQL catalog via a connection URL.
    pub async fn from_url(url: &str, max_connections: u32) -> CatalogResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    async fn schema_version(&self) -> CatalogResult<Option<i64>> {
        let value: Option<(String,)> =
            sqlx::query_as("SELECT value FROM globals WHERE key = 'dbversion'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.and_then(|(v,)| v.parse().ok()))
    }
}

#[async_trait]
impl CatalogStore for PostgresCatalog {
    async fn is_initialized(&self) -> CatalogResult<bool> {
        let has_globals: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = 'globals')",
        )
        .fetch_one(&self.pool)
        .await?;
        if !has_globals {
            return Ok(false);
        }

        let sequence: Option<(String,)> =
            sqlx::query_as("SELECT value FROM globals WHERE key = 'sequence'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(sequence.is_some())
    }

    async fn init(&self) -> CatalogResult<()> {
        for statement in schema_statements(SCHEMA_SQL) {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        match self.schema_version().await? {
            Some(found) if found > SCHEMA_VERSION => {
                return Err(CatalogError::SchemaVersion {
                    found,
                    supported: SCHEMA_VERSION,
                });
            }
            Some(_) => {}
            None => {
                sqlx::query(
                    "INSERT INTO globals (key, value) VALUES ('dbversion', $1)
                     ON CONFLICT (key) DO NOTHING",
                )
                .bind(SCHEMA_VERSION.to_string())
                .execute(&self.pool)
                .await?;
            }
        }

        sqlx::query(
            "INSERT INTO globals (key, value) VALUES ('sequence', '0')
             ON CONFLICT (key) DO NOTHING",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_sequence(&self) -> CatalogResult<i64> {
        let value: Option<(String,)> =
            sqlx::query_as("SELECT value FROM globals WHERE key = 'sequence'")
                .fetch_optional(&self.pool)
                .await?;
        match value {
            Some((v,)) => v
                .parse()
                .map_err(|_| CatalogError::Internal(format!("malformed sequence value: {v}"))),
            None => Ok(0),
        }
    }

    async fn set_sequence(&self, seq: i64) -> CatalogResult<()> {
        sqlx::query(
            "INSERT INTO globals (key, value) VALUES ('sequence', $1)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(seq.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stats(&self) -> CatalogResult<CatalogStats> {
        let (packages, completed): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE completed) FROM packages",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(CatalogStats {
            packages: packages as u64,
            completed: completed as u64,
        })
    }

    async fn count_packages(&self, completed: bool) -> CatalogResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM packages WHERE completed = $1")
            .bind(completed)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn put_packages(&self, packages: &[PackageRef]) -> CatalogResult<()> {
        for batch in packages.chunks(INGEST_BATCH_SIZE) {
            let mut tx = self.pool.begin().await?;
            for package in batch {
                sqlx::query(
                    "INSERT INTO packages (name, revision, completed) VALUES ($1, $2, FALSE)
                     ON CONFLICT (name) DO UPDATE
                     SET revision = excluded.revision, completed = FALSE",
                )
                .bind(&package.name)
                .bind(&package.revision)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
        }
        Ok(())
    }

    async fn add_completed_package(
        &self,
        package: &PackageRef,
        document: &str,
        revision: &str,
        dists: &[DistRecord],
    ) -> CatalogResult<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE packages SET revision = $1, document = $2, completed = TRUE WHERE name = $3",
        )
        .bind(revision)
        .bind(document)
        .bind(&package.name)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO packages (name, revision, document, completed)
                 VALUES ($1, $2, $3, TRUE)",
            )
            .bind(&package.name)
            .bind(revision)
            .bind(document)
            .execute(&mut *tx)
            .await?;
        }

        for dist in dists {
            sqlx::query(
                "INSERT INTO package_dists (package_name, hash, path, downloaded)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (package_name, hash, path)
                 DO UPDATE SET downloaded = excluded.downloaded",
            )
            .bind(&package.name)
            .bind(&dist.hash)
            .bind(&dist.path)
            .bind(dist.downloaded)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_package(&self, name: &str) -> CatalogResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM package_dists WHERE package_name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM packages WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_incomplete_packages(&self) -> CatalogResult<Vec<PendingPackage>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT name, revision FROM packages WHERE NOT completed ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let dist_rows: Vec<(String, String, String, bool)> = sqlx::query_as(
            "SELECT d.package_name, d.hash, d.path, d.downloaded
             FROM package_dists d
             JOIN packages p ON p.name = d.package_name
             WHERE NOT p.completed AND d.downloaded",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut downloaded: HashMap<String, Vec<DistRecord>> = HashMap::new();
        for (package_name, hash, path, flag) in dist_rows {
            downloaded.entry(package_name).or_default().push(DistRecord {
                hash,
                path,
                downloaded: flag,
            });
        }

        Ok(rows
            .into_iter()
            .map(|(name, revision)| {
                let dists = downloaded.remove(&name).unwrap_or_default();
                PendingPackage {
                    name,
                    revision,
                    downloaded: dists,
                }
            })
            .collect())
    }

    async fn get_revision(&self, name: &str) -> CatalogResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT revision FROM packages WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(rev,)| rev))
    }

    async fn get_document(
        &self,
        name: &str,
        with_dists: bool,
    ) -> CatalogResult<PackageDocument> {
        let row: Option<(String, bool)> =
            sqlx::query_as("SELECT document, completed FROM packages WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        let (document, completed) = match row {
            Some(row) => row,
            None => return Err(CatalogError::NotFound(name.to_string())),
        };
        if document.is_empty() && !completed {
            return Err(CatalogError::NotYetMirrored(name.to_string()));
        }

        let dists = if with_dists {
            sqlx::query_as::<_, DistRecord>(
                "SELECT hash, path, downloaded FROM package_dists
                 WHERE package_name = $1 ORDER BY path",
            )
            .bind(name)
            .fetch_all(&self.pool)
            .await?
        } else {
            Vec::new()
        };

        Ok(PackageDocument { document, dists })
    }

    async fn completed_packages(&self) -> CatalogResult<Vec<CompletedPackage>> {
        let rows: Vec<(String, String, bool)> = sqlx::query_as(
            "SELECT name, revision, document = '' FROM packages WHERE completed ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let dist_rows: Vec<(String, String, String, bool)> = sqlx::query_as(
            "SELECT d.package_name, d.hash, d.path, d.downloaded
             FROM package_dists d
             JOIN packages p ON p.name = d.package_name
             WHERE p.completed",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_package: HashMap<String, Vec<DistRecord>> = HashMap::new();
        for (package_name, hash, path, downloaded) in dist_rows {
            by_package.entry(package_name).or_default().push(DistRecord {
                hash,
                path,
                downloaded,
            });
        }

        Ok(rows
            .into_iter()
            .map(|(name, revision, document_empty)| {
                let dists = by_package.remove(&name).unwrap_or_default();
                CompletedPackage {
                    name,
                    revision,
                    document_empty,
                    dists,
                }
            })
            .collect())
    }
}
