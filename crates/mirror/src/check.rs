//! Consistency checker: cross-checks catalog marks against documents
//! and on-disk tarballs.

use crate::error::MirrorResult;
use pantry_catalog::CatalogStore;
use pantry_core::path::local_path;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;

/// Outcome of a consistency check.
#[derive(Debug, Default)]
pub struct CheckReport {
    /// Completed packages examined.
    pub checked: u64,
    /// One line per inconsistency found.
    pub problems: Vec<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Examine every completed package: a complete package must have a
/// revision, a document, and every downloaded dist present on disk.
/// Never mutates.
pub async fn check(catalog: &Arc<dyn CatalogStore>, base: &Path) -> MirrorResult<CheckReport> {
    let completed = catalog.completed_packages().await?;
    tracing::info!(count = completed.len(), "checking consistency");

    let mut report = CheckReport::default();
    for package in completed {
        report.checked += 1;

        if package.revision.is_empty() {
            report
                .problems
                .push(format!("{}: empty revision", package.name));
        }
        if package.document_empty {
            report
                .problems
                .push(format!("{}: empty document", package.name));
        }
        for dist in &package.dists {
            if !dist.downloaded {
                continue;
            }
            let path = local_path(base, &dist.path);
            if !fs::try_exists(&path).await.unwrap_or(false) {
                report
                    .problems
                    .push(format!("{}: missing file {}", package.name, path.display()));
            }
        }
    }

    tracing::info!(
        checked = report.checked,
        problems = report.problems.len(),
        "consistency check done"
    );
    Ok(report)
}
