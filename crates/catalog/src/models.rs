//! Catalog row types.

use serde::{Deserialize, Serialize};

/// A package identity as carried by the upstream index and change
/// feed: just a name and its current revision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRef {
    /// Opaque UTF-8 package name. Scoped names begin with `@` and
    /// contain a single `/`.
    pub name: String,
    /// Opaque revision token from the upstream registry.
    pub revision: String,
}

impl PackageRef {
    pub fn new(name: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            revision: revision.into(),
        }
    }
}

/// A per-tarball record owned by a package.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DistRecord {
    /// Hex SHA-1 checksum, 40 characters.
    pub hash: String,
    /// Tarball URL path (e.g. `/react/-/react-1.0.0.tgz`).
    pub path: String,
    /// Whether the file is verified present on disk.
    pub downloaded: bool,
}

/// An incomplete package queued for mirroring, with the dist records
/// already on disk so workers can skip them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingPackage {
    pub name: String,
    pub revision: String,
    /// Dists recorded as downloaded in a previous cycle.
    pub downloaded: Vec<DistRecord>,
}

/// A completed package as seen by the consistency checker.
#[derive(Clone, Debug)]
pub struct CompletedPackage {
    pub name: String,
    pub revision: String,
    /// True when the stored document body is empty.
    pub document_empty: bool,
    pub dists: Vec<DistRecord>,
}

/// Total and completed package counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub packages: u64,
    pub completed: u64,
}

/// A stored document together with its dist records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackageDocument {
    /// Verbatim JSON text as fetched from upstream.
    pub document: String,
    /// Dist records; empty unless requested with `with_dists`.
    pub dists: Vec<DistRecord>,
}
