//! HTTP download behaviour against a throwaway local server.

use std::time::Duration;

use assert_matches::assert_matches;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use recon_storage::{HttpDownloader, StorageError};

async fn serve() -> String {
    let app = Router::new()
        .route("/photos.zip", get(|| async { vec![7u8; 4096] }))
        .route("/missing.zip", get(|| async { StatusCode::NOT_FOUND }))
        .route("/private.zip", get(|| async { StatusCode::FORBIDDEN }))
        .route("/flaky.zip", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
        .route("/throttled.zip", get(|| async { StatusCode::TOO_MANY_REQUESTS }))
        .route(
            "/slow.zip",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn downloader(timeout: Duration) -> HttpDownloader {
    HttpDownloader::new(timeout).unwrap()
}

#[tokio::test]
async fn downloads_body_to_file() {
    let base = serve().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("input.zip");

    let bytes = downloader(Duration::from_secs(5))
        .fetch(&format!("{base}/photos.zip"), &dest)
        .await
        .unwrap();

    assert_eq!(bytes, 4096);
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 4096);
}

#[tokio::test]
async fn not_found_is_permanent() {
    let base = serve().await;
    let dir = tempfile::tempdir().unwrap();

    let err = downloader(Duration::from_secs(5))
        .fetch(&format!("{base}/missing.zip"), &dir.path().join("x"))
        .await
        .unwrap_err();

    assert_matches!(err, StorageError::NotFound(_));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn forbidden_is_permanent() {
    let base = serve().await;
    let dir = tempfile::tempdir().unwrap();

    let err = downloader(Duration::from_secs(5))
        .fetch(&format!("{base}/private.zip"), &dir.path().join("x"))
        .await
        .unwrap_err();

    assert_matches!(err, StorageError::Forbidden(_));
}

#[tokio::test]
async fn too_many_requests_is_permanent() {
    let base = serve().await;
    let dir = tempfile::tempdir().unwrap();

    let err = downloader(Duration::from_secs(5))
        .fetch(&format!("{base}/throttled.zip"), &dir.path().join("x"))
        .await
        .unwrap_err();

    assert_matches!(err, StorageError::Rejected { status: 429, .. });
    assert!(!err.is_transient());
}

#[tokio::test]
async fn server_error_is_transient() {
    let base = serve().await;
    let dir = tempfile::tempdir().unwrap();

    let err = downloader(Duration::from_secs(5))
        .fetch(&format!("{base}/flaky.zip"), &dir.path().join("x"))
        .await
        .unwrap_err();

    assert!(err.is_transient());
}

#[tokio::test]
async fn timeout_is_transient() {
    let base = serve().await;
    let dir = tempfile::tempdir().unwrap();

    let err = downloader(Duration::from_millis(200))
        .fetch(&format!("{base}/slow.zip"), &dir.path().join("x"))
        .await
        .unwrap_err();

    assert!(err.is_transient());
}

#[tokio::test]
async fn connection_refused_is_transient() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let err = downloader(Duration::from_secs(2))
        .fetch(&format!("http://{addr}/photos.zip"), &dir.path().join("x"))
        .await
        .unwrap_err();

    assert_matches!(err, StorageError::Unavailable(_));
}
