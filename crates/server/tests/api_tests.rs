//! Integration tests for the registry HTTP read path.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use pantry_catalog::{CatalogStore, DistRecord, PackageRef, SqliteCatalog};
use pantry_core::config::AppConfig;
use pantry_core::path::local_path;
use pantry_server::{AppState, create_router};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestServer {
    router: axum::Router,
    catalog: Arc<dyn CatalogStore>,
    mirror_dir: std::path::PathBuf,
    _temp: TempDir,
}

async fn test_server(configure: impl FnOnce(&mut AppConfig)) -> TestServer {
    let temp = tempfile::tempdir().expect("failed to create temp directory");
    let mirror_dir = temp.path().join("tarballs");
    std::fs::create_dir_all(&mirror_dir).unwrap();

    let catalog: Arc<dyn CatalogStore> = Arc::new(
        SqliteCatalog::new(temp.path().join("catalog.db"))
            .await
            .expect("failed to open catalog"),
    );
    catalog.init().await.expect("failed to init catalog");

    let mut config = AppConfig::default();
    config.mirror.path = mirror_dir.clone();
    config.server.scheme = "http".to_string();
    config.server.host = "mirror.local:8080".to_string();
    configure(&mut config);

    let router = create_router(AppState::new(config, catalog.clone()));
    TestServer {
        router,
        catalog,
        mirror_dir,
        _temp: temp,
    }
}

async fn get(server: &TestServer, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    get_with_headers(server, uri, &[]).await
}

async fn get_with_headers(
    server: &TestServer,
    uri: &str,
    headers: &[(&str, &str)],
) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let mut builder = Request::builder().method("GET").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::empty()).unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let response_headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    (status, response_headers, body)
}

fn react_document() -> String {
    json!({
        "_id": "react",
        "_rev": "1-a",
        "dist-tags": {"latest": "1.0.0"},
        "versions": {
            "0.9.0": {
                "dist": {
                    "shasum": "a".repeat(40),
                    "tarball": "https://registry.npmjs.org/react/-/react-0.9.0.tgz",
                }
            },
            "1.0.0": {
                "dist": {
                    "shasum": "b".repeat(40),
                    "tarball": "https://registry.npmjs.org/react/-/react-1.0.0.tgz",
                }
            }
        }
    })
    .to_string()
}

async fn seed_react(server: &TestServer) {
    server
        .catalog
        .add_completed_package(
            &PackageRef::new("react", "1-a"),
            &react_document(),
            "1-a",
            &[DistRecord {
                hash: "b".repeat(40),
                path: "/react/-/react-1.0.0.tgz".to_string(),
                downloaded: true,
            }],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn index_reports_mirror_state() {
    let server = test_server(|_| {}).await;
    seed_react(&server).await;
    server
        .catalog
        .put_packages(&[PackageRef::new("pending", "1-p")])
        .await
        .unwrap();
    server.catalog.set_sequence(42).await.unwrap();

    let (status, _, body) = get(&server, "/").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["packages"], 2);
    assert_eq!(json["available"], 1);
    assert_eq!(json["sequence"], 42);
}

#[tokio::test]
async fn document_is_rewritten_and_etagged() {
    let server = test_server(|_| {}).await;
    seed_react(&server).await;

    let (status, headers, body) = get(&server, "/react").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("etag").unwrap(), "\"1-a\"");
    assert_eq!(headers.get("content-type").unwrap(), "application/json");

    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("http://mirror.local:8080/react/-/react-1.0.0.tgz"));
    assert!(text.contains("http://mirror.local:8080/react/-/react-0.9.0.tgz"));
    assert!(!text.contains("registry.npmjs.org"));
}

#[tokio::test]
async fn if_none_match_returns_not_modified() {
    let server = test_server(|_| {}).await;
    seed_react(&server).await;

    let (status, headers, body) =
        get_with_headers(&server, "/react", &[("if-none-match", "\"1-a\"")]).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert_eq!(headers.get("etag").unwrap(), "\"1-a\"");
    assert!(body.is_empty());

    // A stale validator still gets the full document.
    let (status, _, body) =
        get_with_headers(&server, "/react", &[("if-none-match", "\"0-old\"")]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.is_empty());
}

#[tokio::test]
async fn missing_and_unmirrored_documents_are_404() {
    let server = test_server(|_| {}).await;
    server
        .catalog
        .put_packages(&[PackageRef::new("pending", "1-p")])
        .await
        .unwrap();

    let (status, _, _) = get(&server, "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = get(&server, "/pending").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn version_resolution_paths() {
    let server = test_server(|_| {}).await;
    seed_react(&server).await;

    // dist-tag
    let (status, _, body) = get(&server, "/react/latest").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        json["dist"]["tarball"],
        "http://mirror.local:8080/react/-/react-1.0.0.tgz"
    );

    // exact
    let (status, _, body) = get(&server, "/react/0.9.0").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["dist"]["shasum"], "a".repeat(40));

    // caret range (%5E) picks the highest in the major segment
    let (status, _, body) = get(&server, "/react/%5E1.0.0").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["dist"]["shasum"], "b".repeat(40));

    let (status, _, _) = get(&server, "/react/9.9.9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn tarball_download_streams_the_file() {
    let server = test_server(|_| {}).await;
    seed_react(&server).await;

    let path = local_path(&server.mirror_dir, "react/-/react-1.0.0.tgz");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"tarball bytes").unwrap();

    let (status, headers, body) = get(&server, "/react/-/react-1.0.0.tgz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("content-type").unwrap(),
        "application/octet-stream"
    );
    assert_eq!(
        headers.get("content-disposition").unwrap(),
        r#"attachment; filename="react-1.0.0.tgz""#
    );
    assert_eq!(body, b"tarball bytes");
}

#[tokio::test]
async fn tarball_requires_dash_segment_and_rejects_traversal() {
    let server = test_server(|_| {}).await;

    let (status, _, _) = get(&server, "/react/1.0.0/react-1.0.0.tgz").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = get(&server, "/react/-/..%2f..%2fcatalog.db").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = get(&server, "/react/-/missing-9.9.9.tgz").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn scoped_package_routes() {
    let server = test_server(|_| {}).await;
    let document = json!({
        "_id": "@scope/pkg",
        "_rev": "1-s",
        "versions": {
            "1.0.0": {
                "dist": {
                    "shasum": "c".repeat(40),
                    "tarball": "https://registry.npmjs.org/@scope/pkg/-/pkg-1.0.0.tgz",
                }
            }
        }
    })
    .to_string();
    server
        .catalog
        .add_completed_package(&PackageRef::new("@scope/pkg", "1-s"), &document, "1-s", &[])
        .await
        .unwrap();

    // Unencoded scoped document request folds into name/version.
    let (status, headers, body) = get(&server, "/@scope/pkg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("etag").unwrap(), "\"1-s\"");
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("http://mirror.local:8080/@scope/pkg/-/pkg-1.0.0.tgz"));

    // Scoped tarball arrives as four segments and is remapped.
    let path = local_path(&server.mirror_dir, "@scope/pkg/-/pkg-1.0.0.tgz");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"scoped bytes").unwrap();

    let (status, _, body) = get(&server, "/@scope/pkg/-/pkg-1.0.0.tgz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"scoped bytes");
}

#[tokio::test]
async fn redirect_mode_hands_off_to_the_proxy() {
    let server = test_server(|config| {
        config.server.redirect = true;
        config.server.redirect_path = "/_tarballs/".to_string();
    })
    .await;

    let (status, headers, body) = get(&server, "/react/-/react-1.0.0.tgz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("x-accel-redirect").unwrap(),
        "/_tarballs/r/react/-/react-1.0.0.tgz"
    );
    assert!(body.is_empty());
}

#[tokio::test]
async fn unknown_routes_answer_empty_json() {
    let server = test_server(|_| {}).await;
    let (status, _, body) = get(&server, "/a/b/c/d/e").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, b"{}");
}
