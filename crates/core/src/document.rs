//! Registry document parsing.
//!
//! Documents are stored as opaque JSON text; only two read paths
//! exist. The mirror engine extracts `_rev` and `versions.*.dist`,
//! and the registry server resolves version selectors against
//! `dist-tags` and `versions`. Both walks tolerate schema drift: a
//! malformed document yields no data rather than an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A downloadable tarball reference under one version's `dist` field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    /// Hex SHA-1 checksum published by the upstream registry.
    pub shasum: String,
    /// Absolute tarball URL.
    pub tarball: String,
}

impl Distribution {
    /// Whether this distribution is eligible for download: a
    /// 40-character checksum and a `.tgz` or `.tar` tarball.
    pub fn is_valid(&self) -> bool {
        self.shasum.len() == 40
            && (self.tarball.ends_with(".tgz") || self.tarball.ends_with(".tar"))
    }
}

/// Extract the `_rev` field of a document, if parseable.
pub fn revision_of(document: &str) -> Option<String> {
    let doc: Value = serde_json::from_str(document).ok()?;
    doc.get("_rev")?.as_str().map(str::to_string)
}

/// Extract every `versions.*.dist` entry carrying both a `shasum`
/// and a `tarball`.
pub fn distributions(document: &str) -> Vec<Distribution> {
    let Ok(doc) = serde_json::from_str::<Value>(document) else {
        return Vec::new();
    };
    let Some(versions) = doc.get("versions").and_then(Value::as_object) else {
        return Vec::new();
    };

    versions
        .values()
        .filter_map(|version| version.get("dist"))
        .filter_map(|dist| {
            let shasum = dist.get("shasum")?.as_str()?;
            let tarball = dist.get("tarball")?.as_str()?;
            Some(Distribution {
                shasum: shasum.to_string(),
                tarball: tarball.to_string(),
            })
        })
        .collect()
}

/// Resolve a version selector against a full document.
///
/// Lookup order: `dist-tags` (e.g. `latest`), then an exact entry in
/// `versions`. Failing both, a leading `~`, `=`, or `^` is stripped;
/// `~` and `=` require an exact match, while `^` (or a bare selector)
/// picks the highest version sharing the leading major segment.
/// Versions compare as strings, descending; prerelease tags are not
/// ordered by semver precedence.
pub fn resolve_version(document: &str, version: &str) -> Option<Value> {
    let doc: Value = serde_json::from_str(document).ok()?;
    let versions = doc.get("versions")?.as_object()?;

    if let Some(tagged) = doc
        .get("dist-tags")
        .and_then(Value::as_object)
        .and_then(|tags| tags.get(version))
        .and_then(Value::as_str)
    {
        return versions.get(tagged).cloned();
    }

    if let Some(exact) = versions.get(version) {
        return Some(exact.clone());
    }

    let (selector, exact_only) = if let Some(rest) = version.strip_prefix(['~', '=']) {
        (rest, true)
    } else if let Some(rest) = version.strip_prefix('^') {
        (rest, false)
    } else {
        (version, false)
    };

    if exact_only {
        return versions.get(selector).cloned();
    }
    if let Some(exact) = versions.get(selector) {
        return Some(exact.clone());
    }

    let major = selector.split('.').next()?;
    let mut candidates: Vec<&String> = versions
        .keys()
        .filter(|key| key.split('.').next() == Some(major))
        .collect();
    candidates.sort_unstable_by(|a, b| b.cmp(a));
    candidates.first().and_then(|key| versions.get(*key)).cloned()
}
