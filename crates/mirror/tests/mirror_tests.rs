//! End-to-end mirror engine tests against a mock upstream registry.

use httpmock::Method::GET;
use httpmock::MockServer;
use pantry_catalog::{CatalogError, CatalogStore, DistRecord, PackageRef, SqliteCatalog};
use pantry_core::TarballHash;
use pantry_core::config::MirrorConfig;
use pantry_core::path::local_path;
use pantry_mirror::MirrorController;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const ALPHA_TARBALL: &[u8] = b"alpha tarball bytes";

struct Harness {
    _temp: TempDir,
    catalog: Arc<dyn CatalogStore>,
    controller: MirrorController,
    mirror_dir: std::path::PathBuf,
}

async fn harness(server: &MockServer) -> Harness {
    let temp = tempfile::tempdir().expect("failed to create temp directory");
    let mirror_dir = temp.path().join("tarballs");
    let catalog: Arc<dyn CatalogStore> = Arc::new(
        SqliteCatalog::new(temp.path().join("catalog.db"))
            .await
            .expect("failed to open catalog"),
    );
    catalog.init().await.expect("failed to init catalog");

    let config = MirrorConfig {
        registry: server.base_url(),
        concurrency: 2,
        path: mirror_dir.clone(),
        interval: 1,
    };
    let controller =
        MirrorController::new(catalog.clone(), config).expect("failed to build controller");

    Harness {
        _temp: temp,
        catalog,
        controller,
        mirror_dir,
    }
}

fn alpha_shasum() -> String {
    TarballHash::compute(ALPHA_TARBALL).to_hex()
}

fn alpha_document(server: &MockServer, revision: &str) -> serde_json::Value {
    json!({
        "_id": "alpha",
        "_rev": revision,
        "versions": {
            "1.0.0": {
                "dist": {
                    "shasum": alpha_shasum(),
                    "tarball": format!("{}/alpha/-/alpha-1.0.0.tgz", server.base_url()),
                }
            }
        }
    })
}

#[tokio::test]
async fn first_run_mirrors_everything() {
    let server = MockServer::start();
    let h = harness(&server).await;

    server.mock(|when, then| {
        when.method(GET)
            .path("/_all_docs")
            .query_param("update_seq", "true");
        then.status(200).json_body(json!({
            "total_rows": 2,
            "offset": 0,
            "update_seq": 42,
            "rows": [
                {"id": "alpha", "key": "alpha", "value": {"rev": "1-a"}},
                {"id": "beta", "key": "beta", "value": {"rev": "1-b"}},
            ]
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/alpha");
        then.status(200).json_body(alpha_document(&server, "1-a"));
    });
    server.mock(|when, then| {
        when.method(GET).path("/beta");
        then.status(200)
            .json_body(json!({"_id": "beta", "_rev": "1-b"}));
    });
    let tarball = server.mock(|when, then| {
        when.method(GET).path("/alpha/-/alpha-1.0.0.tgz");
        then.status(200).body(ALPHA_TARBALL);
    });

    h.controller.run(true).await.unwrap();

    assert_eq!(h.catalog.get_sequence().await.unwrap(), 42);
    let stats = h.catalog.stats().await.unwrap();
    assert_eq!(stats.packages, 2);
    assert_eq!(stats.completed, 2);
    tarball.assert();

    // Revision invariant: the stored revision equals the document's _rev.
    assert_eq!(
        h.catalog.get_revision("alpha").await.unwrap().as_deref(),
        Some("1-a")
    );

    let stored = h.catalog.get_document("alpha", true).await.unwrap();
    assert_eq!(stored.dists.len(), 1);
    assert_eq!(stored.dists[0].hash, alpha_shasum());
    assert!(stored.dists[0].downloaded);

    // The tarball landed at the bucketed local path and verifies.
    let path = local_path(&h.mirror_dir, "/alpha/-/alpha-1.0.0.tgz");
    assert_eq!(
        pantry_mirror::tarballs::file_sha1(&path).await.unwrap(),
        alpha_shasum()
    );

    // A package without versions completes with no dist records.
    let beta = h.catalog.get_document("beta", true).await.unwrap();
    assert!(beta.dists.is_empty());
}

#[tokio::test]
async fn empty_registry_first_run() {
    let server = MockServer::start();
    let h = harness(&server).await;

    server.mock(|when, then| {
        when.method(GET).path("/_all_docs");
        then.status(200).json_body(json!({
            "total_rows": 0,
            "offset": 0,
            "update_seq": 7,
            "rows": []
        }));
    });

    h.controller.run(true).await.unwrap();

    assert_eq!(h.catalog.get_sequence().await.unwrap(), 7);
    assert_eq!(h.catalog.stats().await.unwrap().packages, 0);
}

#[tokio::test]
async fn deleted_upstream_package_is_removed() {
    let server = MockServer::start();
    let h = harness(&server).await;

    h.catalog
        .put_packages(&[PackageRef::new("gone", "1-z")])
        .await
        .unwrap();
    // Leftovers from an earlier mirror of the package.
    let stale = local_path(&h.mirror_dir, "gone/-/gone-0.1.0.tgz");
    tokio::fs::create_dir_all(stale.parent().unwrap())
        .await
        .unwrap();
    tokio::fs::write(&stale, b"stale").await.unwrap();

    server.mock(|when, then| {
        when.method(GET).path("/gone");
        then.status(404).json_body(json!({"error": "not_found"}));
    });

    h.controller.start().await.unwrap();

    assert_eq!(h.catalog.get_revision("gone").await.unwrap(), None);
    assert!(!stale.exists());
}

#[tokio::test]
async fn unparseable_document_is_persisted_verbatim() {
    let server = MockServer::start();
    let h = harness(&server).await;

    h.catalog
        .put_packages(&[PackageRef::new("weird", "1-w")])
        .await
        .unwrap();
    server.mock(|when, then| {
        when.method(GET).path("/weird");
        then.status(200).body("not json {");
    });

    h.controller.start().await.unwrap();

    assert_eq!(h.catalog.count_packages(true).await.unwrap(), 1);
    let stored = h.catalog.get_document("weird", true).await.unwrap();
    assert_eq!(stored.document, "not json {");
    assert!(stored.dists.is_empty());
}

#[tokio::test]
async fn hash_mismatch_commits_without_download_mark() {
    let server = MockServer::start();
    let h = harness(&server).await;

    h.catalog
        .put_packages(&[PackageRef::new("alpha", "1-a")])
        .await
        .unwrap();

    let mut document = alpha_document(&server, "1-a");
    document["versions"]["1.0.0"]["dist"]["shasum"] = json!("a".repeat(40));
    server.mock(|when, then| {
        when.method(GET).path("/alpha");
        then.status(200).json_body(document);
    });
    server.mock(|when, then| {
        when.method(GET).path("/alpha/-/alpha-1.0.0.tgz");
        then.status(200).body(ALPHA_TARBALL);
    });

    h.controller.start().await.unwrap();

    // Integrity failure marks the dist not-downloaded but the package
    // still completes.
    assert_eq!(h.catalog.count_packages(true).await.unwrap(), 1);
    let stored = h.catalog.get_document("alpha", true).await.unwrap();
    assert!(stored.dists.is_empty());
}

#[tokio::test]
async fn already_downloaded_dists_are_skipped() {
    let server = MockServer::start();
    let h = harness(&server).await;

    let package = PackageRef::new("alpha", "1-a");
    h.catalog
        .add_completed_package(
            &package,
            &alpha_document(&server, "1-a").to_string(),
            "1-a",
            &[DistRecord {
                hash: alpha_shasum(),
                path: "/alpha/-/alpha-1.0.0.tgz".to_string(),
                downloaded: true,
            }],
        )
        .await
        .unwrap();
    // Upstream bumped the revision; the dist set is unchanged.
    h.catalog
        .put_packages(&[PackageRef::new("alpha", "2-b")])
        .await
        .unwrap();

    server.mock(|when, then| {
        when.method(GET).path("/alpha");
        then.status(200).json_body(alpha_document(&server, "2-b"));
    });
    let tarball = server.mock(|when, then| {
        when.method(GET).path("/alpha/-/alpha-1.0.0.tgz");
        then.status(200).body(ALPHA_TARBALL);
    });

    h.controller.start().await.unwrap();

    assert_eq!(tarball.hits(), 0);
    assert_eq!(h.catalog.count_packages(true).await.unwrap(), 1);
    assert_eq!(
        h.catalog.get_revision("alpha").await.unwrap().as_deref(),
        Some("2-b")
    );
    let stored = h.catalog.get_document("alpha", true).await.unwrap();
    assert_eq!(stored.dists.len(), 1);
    assert!(stored.dists[0].downloaded);
}

#[tokio::test]
async fn unchanged_update_tick_is_noop() {
    let server = MockServer::start();
    let h = harness(&server).await;

    h.catalog.set_sequence(5).await.unwrap();
    server.mock(|when, then| {
        when.method(GET).path("/_changes").query_param("since", "5");
        then.status(200)
            .json_body(json!({"results": [], "last_seq": 5}));
    });

    assert!(!h.controller.update_tick().await.unwrap());
    assert_eq!(h.catalog.get_sequence().await.unwrap(), 5);
}

#[tokio::test]
async fn update_tick_refreshes_only_changed_revisions() {
    let server = MockServer::start();
    let h = harness(&server).await;

    h.catalog
        .add_completed_package(
            &PackageRef::new("alpha", "1-a"),
            &alpha_document(&server, "1-a").to_string(),
            "1-a",
            &[],
        )
        .await
        .unwrap();
    h.catalog
        .add_completed_package(&PackageRef::new("beta", "1-x"), "{\"_rev\":\"1-x\"}", "1-x", &[])
        .await
        .unwrap();
    h.catalog.set_sequence(5).await.unwrap();

    server.mock(|when, then| {
        when.method(GET).path("/_changes").query_param("since", "5");
        then.status(200).json_body(json!({
            "results": [
                {"seq": 8, "id": "alpha", "changes": [{"rev": "2-b"}]},
                {"seq": 9, "id": "beta", "changes": [{"rev": "1-x"}]},
            ],
            "last_seq": 9
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/alpha");
        then.status(200)
            .json_body(json!({"_id": "alpha", "_rev": "2-b"}));
    });
    let beta_doc = server.mock(|when, then| {
        when.method(GET).path("/beta");
        then.status(200).json_body(json!({"_id": "beta"}));
    });

    assert!(h.controller.update_tick().await.unwrap());

    assert_eq!(h.catalog.get_sequence().await.unwrap(), 9);
    assert_eq!(
        h.catalog.get_revision("alpha").await.unwrap().as_deref(),
        Some("2-b")
    );
    // The beta revision matched, so its document was never refetched.
    assert_eq!(beta_doc.hits(), 0);
    assert_eq!(h.catalog.count_packages(true).await.unwrap(), 2);
}

#[tokio::test]
async fn upstream_error_leaves_package_incomplete() {
    let server = MockServer::start();
    let h = harness(&server).await;

    h.catalog
        .put_packages(&[PackageRef::new("flaky", "1-f")])
        .await
        .unwrap();
    let document = server.mock(|when, then| {
        when.method(GET).path("/flaky");
        then.status(500).body("upstream broke");
    });

    h.controller.start().await.unwrap();

    // Non-2xx responses are not retried.
    assert_eq!(document.hits(), 1);
    assert_eq!(h.catalog.count_packages(false).await.unwrap(), 1);
    match h.catalog.get_document("flaky", false).await {
        Err(CatalogError::NotYetMirrored(_)) => {}
        other => panic!("expected NotYetMirrored, got {other:?}"),
    }
}

#[tokio::test]
async fn check_reports_missing_tarballs() {
    let server = MockServer::start();
    let h = harness(&server).await;

    h.catalog
        .add_completed_package(
            &PackageRef::new("alpha", "1-a"),
            "{\"_rev\":\"1-a\"}",
            "1-a",
            &[DistRecord {
                hash: alpha_shasum(),
                path: "/alpha/-/alpha-1.0.0.tgz".to_string(),
                downloaded: true,
            }],
        )
        .await
        .unwrap();

    let report = pantry_mirror::check(&h.catalog, &h.mirror_dir).await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.problems.len(), 1);
    assert!(report.problems[0].contains("missing file"));

    // Materialize the file and the report comes back clean.
    let path = local_path(&h.mirror_dir, "/alpha/-/alpha-1.0.0.tgz");
    tokio::fs::create_dir_all(path.parent().unwrap())
        .await
        .unwrap();
    tokio::fs::write(&path, ALPHA_TARBALL).await.unwrap();

    let report = pantry_mirror::check(&h.catalog, &h.mirror_dir).await.unwrap();
    assert!(report.is_clean());
}

#[tokio::test]
async fn scoped_document_requests_encode_the_slash() {
    let server = MockServer::start();
    let h = harness(&server).await;

    h.catalog
        .put_packages(&[PackageRef::new("@scope/pkg", "1-s")])
        .await
        .unwrap();
    // Match on a substring: the request path carries the scoped
    // slash as %2F.
    let document = server.mock(|when, then| {
        when.method(GET).path_contains("@scope");
        then.status(200)
            .json_body(json!({"_id": "@scope/pkg", "_rev": "1-s"}));
    });

    h.controller.start().await.unwrap();

    document.assert();
    assert_eq!(
        h.catalog
            .get_revision("@scope/pkg")
            .await
            .unwrap()
            .as_deref(),
        Some("1-s")
    );
}

#[test]
fn delete_uses_bucketed_prefix() {
    let base = Path::new("/srv/mirror");
    assert_eq!(local_path(base, "react"), Path::new("/srv/mirror/r/react"));
}
