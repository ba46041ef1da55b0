//! Upstream registry client.
//!
//! Four operations against a CouchDB-compatible registry: the full
//! index, per-package documents, the change feed, and tarball
//! downloads. Transport failures are retried a bounded number of
//! times; non-2xx responses are surfaced without retrying.

use crate::error::{MirrorError, MirrorResult};
use crate::tarballs::TarballStore;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

/// Attempts per request before the failure surfaces to the caller.
const MAX_ATTEMPTS: u32 = 3;

/// Base delay between attempts; grows linearly.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Response to `GET {registry}/_all_docs?update_seq=true`.
#[derive(Debug, Deserialize)]
pub struct AllDocs {
    pub total_rows: u64,
    #[serde(default)]
    pub update_seq: i64,
    #[serde(default)]
    pub rows: Vec<IndexRow>,
}

/// One row of the full index.
#[derive(Debug, Deserialize)]
pub struct IndexRow {
    pub id: String,
    pub value: RevisionValue,
}

#[derive(Debug, Deserialize)]
pub struct RevisionValue {
    pub rev: String,
}

/// Response to `GET {registry}/_changes?since={n}`.
#[derive(Debug, Deserialize)]
pub struct Changes {
    #[serde(default)]
    pub results: Vec<ChangeRow>,
    pub last_seq: i64,
}

/// One change-feed entry.
#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    pub id: String,
    #[serde(default)]
    pub changes: Vec<ChangeRevision>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRevision {
    pub rev: String,
}

/// Outcome of a per-package document fetch.
///
/// `Missing` is the typed "deleted upstream" signal: a 404 is a
/// normal lifecycle event, distinct from transport failure.
#[derive(Debug)]
pub enum DocumentFetch {
    Found(String),
    Missing,
}

/// HTTP client for the upstream registry.
pub struct UpstreamClient {
    http: reqwest::Client,
    registry: Url,
    store: TarballStore,
}

impl UpstreamClient {
    /// Create a client for `registry`, downloading tarballs into
    /// `store`.
    pub fn new(registry: &str, store: TarballStore) -> MirrorResult<Self> {
        let mut registry = Url::parse(registry)
            .map_err(|e| MirrorError::InvalidRegistry(format!("{registry}: {e}")))?;
        // A trailing slash makes Url::join append instead of replace.
        if !registry.path().ends_with('/') {
            let path = format!("{}/", registry.path());
            registry.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("pantry/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            registry,
            store,
        })
    }

    /// The tarball store this client writes into.
    pub fn store(&self) -> &TarballStore {
        &self.store
    }

    async fn get_with_retry(&self, url: Url) -> MirrorResult<reqwest::Response> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.http.get(url.clone()).send().await {
                Ok(response) => return Ok(response),
                Err(err) if attempts < MAX_ATTEMPTS => {
                    tracing::warn!(attempts, error = %err, "http error: {url}");
                    tokio::time::sleep(RETRY_BACKOFF * attempts).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn document_url(&self, name: &str) -> MirrorResult<Url> {
        // Scoped names keep their `/` encoded as %2F in the path; the
        // registry rejects the two-segment form.
        if name.starts_with('@') {
            let encoded = name.replacen('/', "%2F", 1);
            Url::parse(&format!("{}{}", self.registry, encoded))
                .map_err(|e| MirrorError::InvalidRegistry(e.to_string()))
        } else {
            self.registry
                .join(name)
                .map_err(|e| MirrorError::InvalidRegistry(e.to_string()))
        }
    }

    /// Fetch the full registry index with the upstream's current
    /// change sequence.
    pub async fn get_all_docs(&self) -> MirrorResult<AllDocs> {
        let mut url = self
            .registry
            .join("_all_docs")
            .map_err(|e| MirrorError::InvalidRegistry(e.to_string()))?;
        url.set_query(Some("update_seq=true"));

        tracing::debug!("get: {url}");
        let response = self.get_with_retry(url.clone()).await?;
        if !response.status().is_success() {
            return Err(MirrorError::UnexpectedStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.json().await?)
    }

    /// Fetch one package document verbatim.
    pub async fn get_document(&self, name: &str) -> MirrorResult<DocumentFetch> {
        let url = self.document_url(name)?;
        tracing::debug!("get: {url}");

        let response = self.get_with_retry(url.clone()).await?;
        match response.status() {
            status if status.is_success() => Ok(DocumentFetch::Found(response.text().await?)),
            StatusCode::NOT_FOUND => Ok(DocumentFetch::Missing),
            status => Err(MirrorError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    /// Fetch the change feed since a sequence.
    pub async fn get_changes_since(&self, seq: i64) -> MirrorResult<Changes> {
        let mut url = self
            .registry
            .join("_changes")
            .map_err(|e| MirrorError::InvalidRegistry(e.to_string()))?;
        url.set_query(Some(&format!("since={seq}")));

        tracing::debug!("get: {url}");
        let response = self.get_with_retry(url.clone()).await?;
        if !response.status().is_success() {
            return Err(MirrorError::UnexpectedStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.json().await?)
    }

    /// Download a tarball to its mapped local path.
    ///
    /// Returns true when the file is on disk with the expected
    /// SHA-1: either it was already there, or the freshly streamed
    /// bytes match both the declared `Content-Length` and the hash.
    pub async fn download(&self, url: &Url, shasum: &str) -> MirrorResult<bool> {
        let path = self.store.local_path(url.path());
        if self.store.verify(&path, shasum).await {
            return Ok(true);
        }

        let response = self.get_with_retry(url.clone()).await?;
        if !response.status().is_success() {
            tracing::warn!(status = response.status().as_u16(), "download failed: {url}");
            return Ok(false);
        }

        let declared = response.content_length();
        let written = self
            .store
            .write_stream(&path, response.bytes_stream())
            .await?;
        if let Some(declared) = declared
            && declared != written
        {
            tracing::warn!(declared, written, "short download: {url}");
            return Ok(false);
        }

        Ok(self.store.verify(&path, shasum).await)
    }
}
