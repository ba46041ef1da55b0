//! On-disk tarball store.
//!
//! Tarballs live under the mirror base directory at the bucketed
//! path produced by [`pantry_core::path::local_path`]. Files are
//! written straight to their final location; an interrupted download
//! leaves a partial file that fails hash verification and is
//! re-fetched on the next cycle.

use crate::error::{MirrorError, MirrorResult};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use pantry_core::TarballHash;
use pantry_core::path::local_path;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Read chunk size for hashing files (64 KiB).
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// The mirror's tarball directory tree.
#[derive(Clone, Debug)]
pub struct TarballStore {
    base: PathBuf,
}

impl TarballStore {
    /// Create a store rooted at `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The mirror base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Map a tarball URL path to its on-disk location.
    pub fn local_path(&self, url_path: &str) -> PathBuf {
        local_path(&self.base, url_path)
    }

    /// Whether the file at `path` exists and hashes to `expected`.
    pub async fn verify(&self, path: &Path, expected: &str) -> bool {
        match file_sha1(path).await {
            Ok(actual) => actual == expected,
            Err(_) => false,
        }
    }

    /// Stream a download body into `path`, creating parent
    /// directories lazily. Returns the number of bytes written.
    pub async fn write_stream<S, E>(&self, path: &Path, mut body: S) -> MirrorResult<u64>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk =
                chunk.map_err(|e| MirrorError::Internal(format!("download stream: {e}")))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    /// Best-effort recursive removal of a deleted package's tarball
    /// prefix.
    pub async fn remove_package_dir(&self, name: &str) {
        let path = self.local_path(name);
        if let Err(err) = fs::remove_dir_all(&path).await
            && err.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove tarball directory");
        }
    }
}

/// Hex SHA-1 digest of a file, read in chunks.
pub async fn file_sha1(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = TarballHash::hasher();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_write_stream_and_verify() {
        let temp = tempfile::tempdir().unwrap();
        let store = TarballStore::new(temp.path());
        let path = store.local_path("/react/-/react-1.0.0.tgz");

        let body = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]);
        let written = store.write_stream(&path, body).await.unwrap();
        assert_eq!(written, 11);
        assert_eq!(path, temp.path().join("r/react/-/react-1.0.0.tgz"));

        let expected = TarballHash::compute(b"hello world").to_hex();
        assert!(store.verify(&path, &expected).await);
        assert!(!store.verify(&path, &"0".repeat(40)).await);
    }

    #[tokio::test]
    async fn test_verify_missing_file() {
        let temp = tempfile::tempdir().unwrap();
        let store = TarballStore::new(temp.path());
        let path = store.local_path("/gone/-/gone-1.0.0.tgz");
        assert!(!store.verify(&path, &"0".repeat(40)).await);
    }

    #[tokio::test]
    async fn test_remove_package_dir() {
        let temp = tempfile::tempdir().unwrap();
        let store = TarballStore::new(temp.path());
        let path = store.local_path("/react/-/react-1.0.0.tgz");
        let body = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"data"))]);
        store.write_stream(&path, body).await.unwrap();

        store.remove_package_dir("react").await;
        assert!(!path.exists());
        // Removing an absent prefix is not an error.
        store.remove_package_dir("react").await;
    }
}
