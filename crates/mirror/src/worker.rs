//! Mirror worker: one package's fetch-parse-download cycle.

use crate::client::{DocumentFetch, UpstreamClient};
use pantry_catalog::PendingPackage;
use pantry_core::document::{self, Distribution};
use reqwest::Url;
use std::sync::Arc;
use tokio::sync::mpsc;

/// The per-dist outcome carried in a work result.
#[derive(Clone, Debug)]
pub struct DistState {
    pub shasum: String,
    pub tarball: String,
    /// True when the tarball is verified on disk.
    pub completed: bool,
}

/// The outcome of one package job.
#[derive(Debug)]
pub struct WorkResult {
    pub package: PendingPackage,
    /// `_rev` parsed from the fetched document; empty on parse failure.
    pub revision: String,
    /// Verbatim document text; empty when the fetch failed.
    pub document: String,
    pub dists: Vec<DistState>,
    /// The document is gone upstream; mirror-side state must follow.
    pub deleted: bool,
    pub worker_id: usize,
}

/// A pool worker.
///
/// Each worker owns a personal work channel with room for exactly one
/// job. It advertises idleness by publishing the sending half onto
/// the shared idle queue, waits for either a job or a quit signal,
/// and emits one result per job. A quit signal never interrupts a job
/// in progress.
pub struct Worker {
    id: usize,
    client: Arc<UpstreamClient>,
    work_tx: mpsc::Sender<PendingPackage>,
    work_rx: mpsc::Receiver<PendingPackage>,
    idle_tx: mpsc::Sender<mpsc::Sender<PendingPackage>>,
    result_tx: mpsc::Sender<WorkResult>,
    quit_rx: mpsc::Receiver<()>,
}

impl Worker {
    pub fn new(
        id: usize,
        client: Arc<UpstreamClient>,
        idle_tx: mpsc::Sender<mpsc::Sender<PendingPackage>>,
        result_tx: mpsc::Sender<WorkResult>,
        quit_rx: mpsc::Receiver<()>,
    ) -> Self {
        let (work_tx, work_rx) = mpsc::channel(1);
        Self {
            id,
            client,
            work_tx,
            work_rx,
            idle_tx,
            result_tx,
            quit_rx,
        }
    }

    /// The worker loop: publish, receive, process, emit.
    pub async fn run(mut self) {
        loop {
            if self.idle_tx.send(self.work_tx.clone()).await.is_err() {
                return;
            }

            tokio::select! {
                work = self.work_rx.recv() => {
                    let Some(package) = work else { return };
                    let result = self.process(package).await;
                    if self.result_tx.send(result).await.is_err() {
                        return;
                    }
                }
                _ = self.quit_rx.recv() => return,
            }
        }
    }

    async fn process(&self, package: PendingPackage) -> WorkResult {
        tracing::info!(worker = self.id, "mirroring: {}", package.name);

        let document = match self.client.get_document(&package.name).await {
            Ok(DocumentFetch::Found(document)) => document,
            Ok(DocumentFetch::Missing) => {
                return WorkResult {
                    revision: String::new(),
                    document: String::new(),
                    dists: Vec::new(),
                    deleted: true,
                    worker_id: self.id,
                    package,
                };
            }
            Err(err) => {
                tracing::error!(worker = self.id, error = %err, "failed to fetch document: {}", package.name);
                return WorkResult {
                    revision: String::new(),
                    document: String::new(),
                    dists: Vec::new(),
                    deleted: false,
                    worker_id: self.id,
                    package,
                };
            }
        };

        let revision = match document::revision_of(&document) {
            Some(revision) => revision,
            None => {
                tracing::warn!(worker = self.id, "failed to decode document: {}", package.name);
                String::new()
            }
        };

        let distributions = document::distributions(&document);
        tracing::debug!(
            worker = self.id,
            files = distributions.len(),
            "files to download: {}",
            package.name
        );

        let mut dists = Vec::with_capacity(distributions.len());
        for dist in distributions {
            let completed = if self.already_downloaded(&package, &dist) {
                true
            } else {
                self.download(&package, &dist).await
            };
            dists.push(DistState {
                shasum: dist.shasum,
                tarball: dist.tarball,
                completed,
            });
        }

        WorkResult {
            revision,
            document,
            dists,
            deleted: false,
            worker_id: self.id,
            package,
        }
    }

    /// Whether a previous cycle already verified this dist on disk.
    fn already_downloaded(&self, package: &PendingPackage, dist: &Distribution) -> bool {
        let Ok(url) = Url::parse(&dist.tarball) else {
            return false;
        };
        package
            .downloaded
            .iter()
            .any(|known| known.downloaded && known.hash == dist.shasum && known.path == url.path())
    }

    async fn download(&self, package: &PendingPackage, dist: &Distribution) -> bool {
        if !dist.is_valid() {
            return false;
        }
        let url = match Url::parse(&dist.tarball) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(worker = self.id, error = %err, "bad tarball URL: {}", dist.tarball);
                return false;
            }
        };

        match self.client.download(&url, &dist.shasum).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(worker = self.id, "failed to download: {}", url.path());
                false
            }
            Err(err) => {
                tracing::warn!(worker = self.id, error = %err, "failed to download: {}", url.path());
                false
            }
        }
    }
}
