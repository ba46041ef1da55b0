//! Tarball integrity hashes.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// A SHA-1 tarball checksum represented as 20 bytes.
///
/// The upstream registry publishes per-tarball `shasum` fields as
/// 40-character lowercase hex; this type round-trips that format.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TarballHash([u8; 20]);

impl TarballHash {
    /// Create a new TarballHash from raw bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Compute the SHA-1 hash of data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Create an incremental hasher.
    pub fn hasher() -> TarballHasher {
        TarballHasher(Sha1::new())
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 40 {
            return Err(crate::Error::InvalidHash(format!(
                "expected 40 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 20];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str =
                std::str::from_utf8(chunk).map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for TarballHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TarballHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for TarballHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental SHA-1 hasher.
pub struct TarballHasher(Sha1);

impl TarballHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> TarballHash {
        TarballHash(self.0.finalize().into())
    }
}

impl Default for TarballHasher {
    fn default() -> Self {
        TarballHash::hasher()
    }
}
