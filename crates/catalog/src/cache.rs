//! Best-effort read cache in front of a catalog store.

use crate::error::CatalogResult;
use crate::models::{
    CatalogStats, CompletedPackage, DistRecord, PackageDocument, PackageRef, PendingPackage,
};
use crate::store::CatalogStore;
use async_trait::async_trait;
use mini_moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Entry bound for the revision cache; revisions are tiny, so this is
/// a count rather than a byte budget.
const REVISION_CACHE_CAPACITY: u64 = 100_000;

/// A caching wrapper over any [`CatalogStore`].
///
/// Documents, revisions, and counts are cached with a byte budget and
/// a TTL taken from configuration; writes invalidate the affected
/// entries. The cache is an accelerator only — every answer it gives
/// was read from the store, and a miss always falls through.
pub struct CachedCatalog {
    inner: Arc<dyn CatalogStore>,
    documents: Cache<String, PackageDocument>,
    revisions: Cache<String, String>,
    stats: Cache<u8, CatalogStats>,
    counts: Cache<bool, u64>,
}

impl CachedCatalog {
    /// Wrap a store with a cache of `max_size_mb` megabytes of
    /// document text and a `lifetime_minutes` TTL.
    pub fn new(inner: Arc<dyn CatalogStore>, max_size_mb: u64, lifetime_minutes: u64) -> Self {
        let ttl = Duration::from_secs(lifetime_minutes.max(1) * 60);
        let documents = Cache::builder()
            .max_capacity(max_size_mb.max(1) * 1024 * 1024)
            .weigher(|key: &String, value: &PackageDocument| {
                (key.len() + value.document.len()).min(u32::MAX as usize) as u32
            })
            .time_to_live(ttl)
            .build();
        let revisions = Cache::builder()
            .max_capacity(REVISION_CACHE_CAPACITY)
            .time_to_live(ttl)
            .build();
        let stats = Cache::builder().max_capacity(1).time_to_live(ttl).build();
        let counts = Cache::builder().max_capacity(2).time_to_live(ttl).build();

        Self {
            inner,
            documents,
            revisions,
            stats,
            counts,
        }
    }

    fn invalidate_package(&self, name: &str) {
        self.documents.invalidate(&name.to_string());
        self.revisions.invalidate(&name.to_string());
    }

    fn invalidate_counts(&self) {
        self.stats.invalidate(&0);
        self.counts.invalidate(&true);
        self.counts.invalidate(&false);
    }
}

#[async_trait]
impl CatalogStore for CachedCatalog {
    async fn is_initialized(&self) -> CatalogResult<bool> {
        self.inner.is_initialized().await
    }

    async fn init(&self) -> CatalogResult<()> {
        self.inner.init().await
    }

    async fn get_sequence(&self) -> CatalogResult<i64> {
        self.inner.get_sequence().await
    }

    async fn set_sequence(&self, seq: i64) -> CatalogResult<()> {
        self.inner.set_sequence(seq).await
    }

    async fn stats(&self) -> CatalogResult<CatalogStats> {
        if let Some(cached) = self.stats.get(&0) {
            return Ok(cached);
        }
        let stats = self.inner.stats().await?;
        self.stats.insert(0, stats);
        Ok(stats)
    }

    async fn count_packages(&self, completed: bool) -> CatalogResult<u64> {
        if let Some(cached) = self.counts.get(&completed) {
            return Ok(cached);
        }
        let count = self.inner.count_packages(completed).await?;
        self.counts.insert(completed, count);
        Ok(count)
    }

    async fn put_packages(&self, packages: &[PackageRef]) -> CatalogResult<()> {
        self.inner.put_packages(packages).await?;
        for package in packages {
            self.invalidate_package(&package.name);
        }
        self.invalidate_counts();
        Ok(())
    }

    async fn add_completed_package(
        &self,
        package: &PackageRef,
        document: &str,
        revision: &str,
        dists: &[DistRecord],
    ) -> CatalogResult<()> {
        self.inner
            .add_completed_package(package, document, revision, dists)
            .await?;
        self.invalidate_package(&package.name);
        self.invalidate_counts();
        Ok(())
    }

    async fn delete_package(&self, name: &str) -> CatalogResult<()> {
        self.inner.delete_package(name).await?;
        self.invalidate_package(name);
        self.invalidate_counts();
        Ok(())
    }

    async fn get_incomplete_packages(&self) -> CatalogResult<Vec<PendingPackage>> {
        self.inner.get_incomplete_packages().await
    }

    async fn get_revision(&self, name: &str) -> CatalogResult<Option<String>> {
        if let Some(cached) = self.revisions.get(&name.to_string()) {
            return Ok(Some(cached));
        }
        let revision = self.inner.get_revision(name).await?;
        if let Some(revision) = &revision {
            self.revisions.insert(name.to_string(), revision.clone());
        }
        Ok(revision)
    }

    async fn get_document(
        &self,
        name: &str,
        with_dists: bool,
    ) -> CatalogResult<PackageDocument> {
        let cached = self.documents.get(&name.to_string());
        let full = match cached {
            Some(found) => found,
            None => {
                // Always cache the dist-bearing variant so a later
                // with_dists read never sees a truncated entry.
                let fetched = self.inner.get_document(name, true).await?;
                self.documents.insert(name.to_string(), fetched.clone());
                fetched
            }
        };

        if with_dists {
            Ok(full)
        } else {
            Ok(PackageDocument {
                document: full.document,
                dists: Vec::new(),
            })
        }
    }

    async fn completed_packages(&self) -> CatalogResult<Vec<CompletedPackage>> {
        self.inner.completed_packages().await
    }
}
