//! Catalog store trait and the SQLite implementation.

use crate::error::{CatalogError, CatalogResult};
use crate::models::{
    CatalogStats, CompletedPackage, DistRecord, PackageDocument, PackageRef, PendingPackage,
};
use async_trait::async_trait;
use pantry_core::INGEST_BATCH_SIZE;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Current schema version recorded in the `dbversion` global.
pub const SCHEMA_VERSION: i64 = 1;

/// Persistent package catalog.
///
/// The catalog is the only owner of mirror state: package identity
/// and revision, completion marks, verbatim document bodies, and
/// per-tarball records. Every mutation runs inside a transaction.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Whether the schema is present and the sequence cell exists.
    async fn is_initialized(&self) -> CatalogResult<bool>;

    /// Create the schema and seed `sequence = 0`; idempotent.
    async fn init(&self) -> CatalogResult<()>;

    /// Read the last consumed upstream change sequence.
    async fn get_sequence(&self) -> CatalogResult<i64>;

    /// Persist the last consumed upstream change sequence.
    async fn set_sequence(&self, seq: i64) -> CatalogResult<()>;

    /// Total and completed package counts.
    async fn stats(&self) -> CatalogResult<CatalogStats>;

    /// Count packages by completion flag.
    async fn count_packages(&self, completed: bool) -> CatalogResult<u64>;

    /// Bulk-upsert packages as incomplete, committing every 10 000
    /// rows. An existing row gets its revision replaced and its
    /// completion mark cleared; its document and dist records are
    /// left untouched.
    async fn put_packages(&self, packages: &[PackageRef]) -> CatalogResult<()>;

    /// Mark a package complete: write its document and revision and
    /// upsert its dist records by `(hash, path)`, all in one
    /// transaction.
    async fn add_completed_package(
        &self,
        package: &PackageRef,
        document: &str,
        revision: &str,
        dists: &[DistRecord],
    ) -> CatalogResult<()>;

    /// Remove a package row and all dist records it owns.
    async fn delete_package(&self, name: &str) -> CatalogResult<()>;

    /// All incomplete packages ordered by name, each carrying the
    /// dist records already downloaded in earlier cycles.
    async fn get_incomplete_packages(&self) -> CatalogResult<Vec<PendingPackage>>;

    /// The stored revision of a package, if the package exists.
    async fn get_revision(&self, name: &str) -> CatalogResult<Option<String>>;

    /// The stored document of a package.
    ///
    /// A missing row is `NotFound`; a row whose document is still
    /// empty and unmarked is `NotYetMirrored`.
    async fn get_document(&self, name: &str, with_dists: bool)
    -> CatalogResult<PackageDocument>;

    /// All completed packages with their dist records, for the
    /// consistency checker.
    async fn completed_packages(&self) -> CatalogResult<Vec<CompletedPackage>>;
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS globals (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS packages (
    name      TEXT PRIMARY KEY,
    revision  TEXT NOT NULL DEFAULT '',
    document  TEXT NOT NULL DEFAULT '',
    completed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_packages_completed ON packages(completed);

CREATE TABLE IF NOT EXISTS package_dists (
    package_name TEXT NOT NULL REFERENCES packages(name) ON DELETE CASCADE,
    hash         TEXT NOT NULL,
    path         TEXT NOT NULL,
    downloaded   INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (package_name, hash, path)
);

CREATE INDEX IF NOT EXISTS idx_package_dists_downloaded ON package_dists(downloaded);
"#;

/// SQLite-backed catalog.
pub struct SqliteCatalog {
    pool: Pool<Sqlite>,
}

impl SqliteCatalog {
    /// Open (or create) a catalog database file.
    pub async fn new(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures while the
            // worker pool and the result handler share the catalog.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
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
impl CatalogStore for SqliteCatalog {
    async fn is_initialized(&self) -> CatalogResult<bool> {
        let has_globals: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'globals')",
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
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;

        match self.schema_version().await? {
            Some(found) if found > SCHEMA_VERSION => {
                return Err(CatalogError::SchemaVersion {
                    found,
                    supported: SCHEMA_VERSION,
                });
            }
            Some(_) => {}
            None => {
                sqlx::query("INSERT OR IGNORE INTO globals (key, value) VALUES ('dbversion', ?)")
                    .bind(SCHEMA_VERSION.to_string())
                    .execute(&self.pool)
                    .await?;
            }
        }

        sqlx::query("INSERT OR IGNORE INTO globals (key, value) VALUES ('sequence', '0')")
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
            "INSERT INTO globals (key, value) VALUES ('sequence', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(seq.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stats(&self) -> CatalogResult<CatalogStats> {
        let (packages, completed): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(completed), 0) FROM packages",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(CatalogStats {
            packages: packages as u64,
            completed: completed as u64,
        })
    }

    async fn count_packages(&self, completed: bool) -> CatalogResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM packages WHERE completed = ?")
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
                    "INSERT INTO packages (name, revision, completed) VALUES (?, ?, 0)
                     ON CONFLICT(name) DO UPDATE
                     SET revision = excluded.revision, completed = 0",
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
            "UPDATE packages SET revision = ?, document = ?, completed = 1 WHERE name = ?",
        )
        .bind(revision)
        .bind(document)
        .bind(&package.name)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO packages (name, revision, document, completed) VALUES (?, ?, ?, 1)",
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
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(package_name, hash, path)
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
        // Cascade covers the dist rows; the explicit delete keeps the
        // behavior identical when foreign keys are compiled out.
        sqlx::query("DELETE FROM package_dists WHERE package_name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM packages WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_incomplete_packages(&self) -> CatalogResult<Vec<PendingPackage>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, revision FROM packages WHERE completed = 0 ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        let dist_rows: Vec<(String, String, String, bool)> = sqlx::query_as(
            "SELECT d.package_name, d.hash, d.path, d.downloaded
             FROM package_dists d
             JOIN packages p ON p.name = d.package_name
             WHERE p.completed = 0 AND d.downloaded = 1",
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
            sqlx::query_as("SELECT revision FROM packages WHERE name = ?")
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
            sqlx::query_as("SELECT document, completed FROM packages WHERE name = ?")
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
                "SELECT hash, path, downloaded FROM package_dists WHERE package_name = ? ORDER BY path",
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
            "SELECT name, revision, document = '' FROM packages WHERE completed = 1 ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let dist_rows: Vec<(String, String, String, bool)> = sqlx::query_as(
            "SELECT d.package_name, d.hash, d.path, d.downloaded
             FROM package_dists d
             JOIN packages p ON p.name = d.package_name
             WHERE p.completed = 1",
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
