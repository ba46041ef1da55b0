//! Mirror controller: first-run ingestion, the start cycle, and the
//! continuous update loop.

use crate::client::UpstreamClient;
use crate::error::{MirrorError, MirrorResult};
use crate::pool::WorkerPool;
use crate::tarballs::TarballStore;
use crate::worker::WorkResult;
use pantry_catalog::{CatalogStore, DistRecord, PackageRef};
use pantry_core::config::MirrorConfig;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Orchestrates the mirror pipeline against one upstream registry.
pub struct MirrorController {
    catalog: Arc<dyn CatalogStore>,
    client: Arc<UpstreamClient>,
    store: TarballStore,
    config: MirrorConfig,
}

impl MirrorController {
    /// Create a controller; fails on a malformed registry URL or an
    /// uncreatable mirror directory.
    pub fn new(catalog: Arc<dyn CatalogStore>, config: MirrorConfig) -> MirrorResult<Self> {
        std::fs::create_dir_all(&config.path)?;
        let store = TarballStore::new(&config.path);
        let client = Arc::new(UpstreamClient::new(&config.registry, store.clone())?);
        Ok(Self {
            catalog,
            client,
            store,
            config,
        })
    }

    async fn initialize(&self) -> MirrorResult<()> {
        if self.catalog.is_initialized().await? {
            tracing::debug!("catalog already initialized");
        } else {
            tracing::debug!("catalog not initialized yet, creating schema");
            self.catalog.init().await?;
        }
        Ok(())
    }

    /// Drive the mirror: first run or catch-up as the catalog state
    /// dictates, then the update loop unless `one_shot` is set.
    pub async fn run(&self, one_shot: bool) -> MirrorResult<()> {
        self.initialize().await?;

        let stats = self.catalog.stats().await?;
        let sequence = self.catalog.get_sequence().await?;
        tracing::debug!(
            packages = stats.packages,
            completed = stats.completed,
            sequence,
            "catalog status"
        );

        if sequence == 0 {
            tracing::info!("first run: ingesting the full index");
            self.first_run().await?;
            self.start().await?;
        } else if stats.completed < stats.packages {
            tracing::info!(
                completed = stats.completed,
                total = stats.packages,
                "resuming incomplete mirror"
            );
            self.start().await?;
        }

        if one_shot {
            return Ok(());
        }

        tracing::info!(interval = self.config.interval, "entering update loop");
        self.update_loop().await
    }

    /// Ingest the full upstream index as incomplete packages and
    /// record the upstream sequence.
    pub async fn first_run(&self) -> MirrorResult<()> {
        let all_docs = self.client.get_all_docs().await?;
        tracing::info!(total = all_docs.total_rows, "documents found upstream");

        let packages: Vec<PackageRef> = all_docs
            .rows
            .iter()
            .map(|row| PackageRef::new(&row.id, &row.value.rev))
            .collect();
        self.catalog.put_packages(&packages).await?;
        self.catalog.set_sequence(all_docs.update_seq).await?;
        Ok(())
    }

    /// Mirror every incomplete package through the worker pool and
    /// commit the results.
    pub async fn start(&self) -> MirrorResult<()> {
        let pending = self.catalog.get_incomplete_packages().await?;
        tracing::debug!(count = pending.len(), "packages to queue");
        if pending.is_empty() {
            return Ok(());
        }

        let (result_tx, result_rx) = mpsc::channel(1);
        let pool = WorkerPool::start(&self.client, self.config.concurrency, result_tx);
        let handler = tokio::spawn(handle_results(
            self.catalog.clone(),
            self.store.clone(),
            result_rx,
            pending.len(),
        ));

        for package in pending {
            if !pool.dispatch(package).await {
                return Err(MirrorError::Internal("work queue closed early".to_string()));
            }
        }
        tracing::debug!("dispatched all queued packages");

        handler
            .await
            .map_err(|e| MirrorError::Internal(format!("result handler failed: {e}")))?;
        pool.shutdown().await;
        tracing::info!("mirror cycle done");
        Ok(())
    }

    /// Poll the change feed forever, refreshing changed packages.
    async fn update_loop(&self) -> MirrorResult<()> {
        let interval = Duration::from_secs(self.config.interval);
        loop {
            match self.update_tick().await {
                Ok(true) => tracing::info!("update: finished"),
                Ok(false) => tracing::info!("update: currently up to date"),
                Err(err) => tracing::error!(error = %err, "update: tick failed"),
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// One change-feed consumption step. Returns whether any package
    /// was refreshed.
    pub async fn update_tick(&self) -> MirrorResult<bool> {
        let since = self.catalog.get_sequence().await?;
        let changes = self.client.get_changes_since(since).await?;

        if since == changes.last_seq {
            return Ok(false);
        }

        // The feed may carry several entries per package; last
        // revision wins.
        let mut updates: HashMap<String, PackageRef> = HashMap::new();
        for change in &changes.results {
            let Some(revision) = change.changes.first().map(|c| c.rev.as_str()) else {
                continue;
            };
            let current = self.catalog.get_revision(&change.id).await?;
            if current.as_deref() != Some(revision) {
                updates.insert(change.id.clone(), PackageRef::new(&change.id, revision));
            }
        }

        let packages: Vec<PackageRef> = updates.into_values().collect();
        tracing::info!(count = packages.len(), "update: packages to refresh");

        self.catalog.put_packages(&packages).await?;
        // The sequence advances before Start runs; a crash in between
        // leaves incomplete rows, which the next cycle retries.
        self.catalog.set_sequence(changes.last_seq).await?;
        tracing::debug!(
            from = since,
            to = changes.last_seq,
            "update: sequence advanced"
        );

        self.start().await?;
        Ok(true)
    }
}

/// Single consumer of the result queue: reconciles every worker
/// result into the catalog.
async fn handle_results(
    catalog: Arc<dyn CatalogStore>,
    store: TarballStore,
    mut result_rx: mpsc::Receiver<WorkResult>,
    expected: usize,
) {
    let mut handled = 0;
    while handled < expected {
        let Some(result) = result_rx.recv().await else {
            tracing::error!(handled, expected, "result queue closed early");
            return;
        };
        handled += 1;

        if result.deleted {
            store.remove_package_dir(&result.package.name).await;
            match catalog.delete_package(&result.package.name).await {
                Ok(()) => {
                    tracing::info!(worker = result.worker_id, "deleted: {}", result.package.name);
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to delete: {}", result.package.name);
                }
            }
            continue;
        }

        if result.document.is_empty() {
            tracing::error!("failed to mirror: {}", result.package.name);
            continue;
        }

        let dists: Vec<DistRecord> = result
            .dists
            .iter()
            .filter(|dist| dist.completed)
            .filter_map(|dist| {
                let url = Url::parse(&dist.tarball).ok()?;
                Some(DistRecord {
                    hash: dist.shasum.clone(),
                    path: url.path().to_string(),
                    downloaded: true,
                })
            })
            .collect();

        let package = PackageRef::new(&result.package.name, &result.package.revision);
        match catalog
            .add_completed_package(&package, &result.document, &result.revision, &dists)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    worker = result.worker_id,
                    same_rev = result.package.revision == result.revision,
                    files = result.dists.len(),
                    "mirrored: {}",
                    result.package.name
                );
            }
            Err(err) => {
                // The transaction rolled back; the package stays
                // incomplete and is retried on the next cycle.
                tracing::error!(error = %err, "failed to mirror: {}", result.package.name);
            }
        }
    }
}
