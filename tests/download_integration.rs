//! Integration tests for the asset downloader.
//!
//! These tests verify the full download flow with mock HTTP servers.

use std::path::{Path, PathBuf};

use offline_core::download::{AssetDownloader, HttpClient};
use offline_core::{CaptureError, CaptureErrorKind, DownloadError, Link};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper to create a mock server with a file endpoint.
async fn setup_mock_file(path_str: &str, content: &[u8]) -> MockServer {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(path_str))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
        .mount(&mock_server)
        .await;

    mock_server
}

fn host_dir(root: &Path, server: &MockServer) -> PathBuf {
    let port = server.address().port();
    root.join(format!("127.0.0.1_{port}"))
}

#[tokio::test]
async fn test_download_mirrors_url_path_and_preserves_content() {
    let content = b"body { color: red }\n";
    let mock_server = setup_mock_file("/static/css/site.css", content).await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let downloader = AssetDownloader::new(HttpClient::new());
    let url = format!("{}/static/css/site.css", mock_server.uri());
    let result = downloader
        .download(&url, temp_dir.path(), &CancellationToken::new())
        .await;

    let file_path = result.expect("download should succeed");
    assert_eq!(
        file_path,
        host_dir(temp_dir.path(), &mock_server).join("static/css/site.css")
    );
    assert_eq!(std::fs::read(&file_path).unwrap(), content);
}

#[tokio::test]
async fn test_download_leaves_no_temp_files_behind() {
    let mock_server = setup_mock_file("/a.png", b"PNG").await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let downloader = AssetDownloader::new(HttpClient::new());
    let url = format!("{}/a.png", mock_server.uri());
    downloader
        .download(&url, temp_dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    let top_level: Vec<_> = std::fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(top_level.len(), 1, "only the host folder should remain: {top_level:?}");
}

#[tokio::test]
async fn test_download_uses_content_disposition_filename() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    Mock::given(method("GET"))
        .and(path("/api/download"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"%PDF".to_vec())
                .insert_header(
                    "content-disposition",
                    "attachment; filename=\"lecture-notes.pdf\"",
                ),
        )
        .mount(&mock_server)
        .await;

    let downloader = AssetDownloader::new(HttpClient::new());
    let url = format!("{}/api/download", mock_server.uri());
    let file_path = downloader
        .download(&url, temp_dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        file_path.file_name().unwrap().to_str().unwrap(),
        "lecture-notes.pdf"
    );
    assert_eq!(file_path.parent().unwrap(), host_dir(temp_dir.path(), &mock_server).join("api"));
}

#[tokio::test]
async fn test_download_forces_mp4_extension_for_video() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    Mock::given(method("GET"))
        .and(path("/media/clip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"MP4".to_vec())
                .insert_header("content-type", "video/mp4"),
        )
        .mount(&mock_server)
        .await;

    let downloader = AssetDownloader::new(HttpClient::new());
    let url = format!("{}/media/clip", mock_server.uri());
    let file_path = downloader
        .download(&url, temp_dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    let filename = file_path.file_name().unwrap().to_str().unwrap();
    assert!(filename.ends_with(".mp4"), "expected mp4 extension: {filename}");
}

#[tokio::test]
async fn test_download_handles_404_as_download_failed() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    Mock::given(method("GET"))
        .and(path("/not-found.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let downloader = AssetDownloader::new(HttpClient::new());
    let url = format!("{}/not-found.png", mock_server.uri());
    let result = downloader
        .download(&url, temp_dir.path(), &CancellationToken::new())
        .await;

    match result {
        Err(CaptureError::DownloadFailed { url: err_url, source }) => {
            assert!(err_url.contains("/not-found.png"));
            assert!(
                matches!(source, DownloadError::HttpStatus { status: 404, .. }),
                "Expected HttpStatus(404), got: {source:?}"
            );
        }
        other => panic!("Expected DownloadFailed, got: {other:?}"),
    }
    assert!(!host_dir(temp_dir.path(), &mock_server).join("not-found.png").exists());
}

#[tokio::test]
async fn test_download_never_overwrites_existing_file() {
    let mock_server = setup_mock_file("/doc.pdf", b"fresh").await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let existing = host_dir(temp_dir.path(), &mock_server).join("doc.pdf");
    std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
    std::fs::write(&existing, b"existing").expect("should create file");

    let downloader = AssetDownloader::new(HttpClient::new());
    let url = format!("{}/doc.pdf", mock_server.uri());
    let file_path = downloader
        .download(&url, temp_dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert_ne!(file_path, existing);
    let filename = file_path.file_name().unwrap().to_str().unwrap();
    assert!(filename.starts_with("doc_") && filename.ends_with(".pdf"), "{filename}");
    assert_eq!(std::fs::read(&existing).unwrap(), b"existing");
    assert_eq!(std::fs::read(&file_path).unwrap(), b"fresh");
}

#[test]
fn test_download_rejects_invalid_url() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let downloader = AssetDownloader::new(HttpClient::new());

    for url in ["definitely-not-a-url", "ftp://files.test/a.zip"] {
        let result = tokio_test::block_on(downloader.download(
            url,
            temp_dir.path(),
            &CancellationToken::new(),
        ));
        assert!(
            matches!(result, Err(CaptureError::WrongUrl { .. })),
            "Expected WrongUrl for {url}, got: {result:?}"
        );
    }
}

#[test]
fn test_download_with_cancelled_token_fails_fast() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let downloader = AssetDownloader::new(HttpClient::new());
    let token = CancellationToken::new();
    token.cancel();

    let result = tokio_test::block_on(downloader.download(
        "https://unreachable.invalid/a.png",
        temp_dir.path(),
        &token,
    ));
    let error = result.unwrap_err();
    assert_eq!(error.kind(), CaptureErrorKind::Cancelled);
}

#[tokio::test]
async fn test_download_link_marks_link_and_skips_when_done() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    Mock::given(method("GET"))
        .and(path("/img/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PNG".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let downloader = AssetDownloader::new(HttpClient::new());
    let url = format!("{}/img/logo.png", mock_server.uri());
    let mut link = Link::new("/img/logo.png", url, "img", "src");
    let token = CancellationToken::new();

    let first = downloader
        .download_link(&mut link, temp_dir.path(), &token)
        .await
        .unwrap();
    let expected = format!("127.0.0.1_{}/img/logo.png", mock_server.address().port());
    assert_eq!(first, expected);
    assert!(link.is_downloaded());

    let second = downloader
        .download_link(&mut link, temp_dir.path(), &token)
        .await
        .unwrap();
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_download_to_unwritable_destination_fails() {
    let mock_server = setup_mock_file("/file.txt", b"content").await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let blocker = temp_dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let downloader = AssetDownloader::new(HttpClient::new());
    let url = format!("{}/file.txt", mock_server.uri());
    let result = downloader
        .download(&url, &blocker, &CancellationToken::new())
        .await;

    match result {
        Err(CaptureError::DownloadFailed { source, .. }) => assert!(
            matches!(source, DownloadError::Io { .. }),
            "Expected IO error, got: {source:?}"
        ),
        other => panic!("Expected DownloadFailed, got: {other:?}"),
    }
}
