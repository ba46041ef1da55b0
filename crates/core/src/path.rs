//! Local path mapping for mirrored tarballs.

use std::path::{Path, PathBuf};

/// Map a tarball URL path to its location under the mirror base.
///
/// The leading `/` is stripped and the file is bucketed under the
/// first Unicode character of the first path segment, keeping
/// directory fanout bounded:
/// `local_path("/srv/mirror", "react/-/react.tgz")` →
/// `/srv/mirror/r/react/-/react.tgz`.
pub fn local_path(base: impl AsRef<Path>, url_path: &str) -> PathBuf {
    let rel = url_path.strip_prefix('/').unwrap_or(url_path);
    let first_segment = rel.split('/').next().unwrap_or("");
    let bucket: String = first_segment.chars().take(1).collect();
    base.as_ref().join(bucket).join(rel)
}

/// Whether a mapped path still lies inside the mirror base.
///
/// Callers must reject `..` components before mapping; this is the
/// final containment check on the joined result.
pub fn is_within(base: impl AsRef<Path>, candidate: &Path) -> bool {
    candidate.starts_with(base.as_ref())
}
