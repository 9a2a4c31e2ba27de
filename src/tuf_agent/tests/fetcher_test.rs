//! Tests for the byte fetcher
//!
//! Local reads, remote status handling, the routing tag header, and length
//! enforcement on both the advertised and the actual body size.

mod common;

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use bytes::Bytes;
use common::spawn_server;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_stream::wrappers::ReceiverStream;
use tuf_agent::{ByteFetcher, FetchError, FetchRequest, Fetcher, Location};

const TIMEOUT: Duration = Duration::from_secs(5);

fn fetcher(tag: &str) -> ByteFetcher {
    ByteFetcher::new(reqwest::Client::new(), tag, "x-ats-tags").unwrap()
}

#[tokio::test]
async fn test_local_file_within_limit() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("timestamp.json");
    std::fs::write(&path, b"{\"signed\":{}}").unwrap();

    let data = fetcher("")
        .fetch(&Location::local(&path), 13, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(&data[..], b"{\"signed\":{}}");
}

#[tokio::test]
async fn test_local_file_over_limit() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("snapshot.json");
    std::fs::write(&path, vec![b'x'; 101]).unwrap();

    let err = fetcher("")
        .fetch(&Location::local(&path), 100, TIMEOUT)
        .await
        .unwrap_err();
    match err {
        FetchError::LengthMismatch {
            length, max_length, ..
        } => {
            assert_eq!(length, 101);
            assert_eq!(max_length, 100);
        }
        other => panic!("expected length mismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn test_local_missing_file_reports_404() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("missing.json");

    let err = fetcher("")
        .fetch(&Location::local(&path), 100, TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    match err {
        FetchError::Http { url, .. } => {
            assert_eq!(url, format!("file://{}", path.display()));
        }
        other => panic!("expected transport failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_local_directory_reports_404() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("targets");
    std::fs::create_dir_all(dir.join("nested")).unwrap();

    // Directory metadata length must not be mistaken for a file size
    let err = fetcher("")
        .fetch(&Location::local(&dir), 1, TIMEOUT)
        .await
        .unwrap_err();
    assert!(!err.is_length_mismatch(), "got {:?}", err);
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_remote_success_sends_tag_header() {
    let seen_tag: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let seen = seen_tag.clone();
    let app = Router::new().route(
        "/repo/targets.json",
        get(move |headers: HeaderMap| {
            let seen = seen.clone();
            async move {
                *seen.lock().unwrap() = headers
                    .get("x-ats-tags")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                "{\"targets\":{}}"
            }
        }),
    );
    let addr = spawn_server(app).await;

    let location = Location::parse(&format!("http://{}/repo/targets.json", addr));
    let data = fetcher("main,qa")
        .fetch(&location, 1024, TIMEOUT)
        .await
        .unwrap();

    assert_eq!(&data[..], b"{\"targets\":{}}");
    assert_eq!(seen_tag.lock().unwrap().as_deref(), Some("main,qa"));
}

#[tokio::test]
async fn test_remote_non_success_status() {
    let app = Router::new().route(
        "/repo/1.root.json",
        get(|| async { (StatusCode::FORBIDDEN, "denied") }),
    );
    let addr = spawn_server(app).await;

    let url = format!("http://{}/repo/1.root.json", addr);
    let err = fetcher("")
        .fetch(&Location::parse(&url), 1024, TIMEOUT)
        .await
        .unwrap_err();
    match err {
        FetchError::Http { status, url: failed } => {
            assert_eq!(status, 403);
            assert_eq!(failed, url);
        }
        other => panic!("expected transport failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_remote_missing_path_reports_status() {
    let addr = spawn_server(Router::new()).await;
    let err = fetcher("")
        .fetch(
            &Location::parse(&format!("http://{}/repo/2.root.json", addr)),
            1024,
            TIMEOUT,
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
}

/// The declared length alone must fail the fetch: the body never completes,
/// so reading it would hit the timeout instead.
#[tokio::test]
async fn test_remote_declared_length_over_limit_fails_before_body() {
    let app = Router::new().route(
        "/repo/snapshot.json",
        get(|| async {
            let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(1);
            tokio::spawn(async move {
                let _ = tx.send(Ok(Bytes::from_static(b"0123456789"))).await;
                // Keep the body open without sending the rest
                tokio::time::sleep(Duration::from_secs(60)).await;
                drop(tx);
            });
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Length", "500")
                .body(Body::from_stream(ReceiverStream::new(rx)))
                .unwrap()
        }),
    );
    let addr = spawn_server(app).await;

    let location = Location::parse(&format!("http://{}/repo/snapshot.json", addr));
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        fetcher("").fetch(&location, 100, Duration::from_secs(30)),
    )
    .await
    .expect("fetch must not wait for the body");

    match result.unwrap_err() {
        FetchError::LengthMismatch {
            length, max_length, ..
        } => {
            assert_eq!(length, 500);
            assert_eq!(max_length, 100);
        }
        other => panic!("expected length mismatch, got {:?}", other),
    }
}

/// Without a Content-Length header the limit is enforced on the bytes read.
#[tokio::test]
async fn test_remote_body_over_limit_without_declared_length() {
    let app = Router::new().route(
        "/repo/targets.json",
        get(|| async {
            let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(4);
            tokio::spawn(async move {
                for _ in 0..3 {
                    let _ = tx.send(Ok(Bytes::from(vec![b'a'; 100]))).await;
                }
            });
            Response::builder()
                .status(StatusCode::OK)
                .body(Body::from_stream(ReceiverStream::new(rx)))
                .unwrap()
        }),
    );
    let addr = spawn_server(app).await;

    let location = Location::parse(&format!("http://{}/repo/targets.json", addr));
    let err = fetcher("").fetch(&location, 150, TIMEOUT).await.unwrap_err();
    assert!(err.is_length_mismatch(), "got {:?}", err);
}

#[tokio::test]
async fn test_remote_body_exactly_at_limit() {
    let app = Router::new().route(
        "/repo/timestamp.json",
        get(|| async { vec![b'z'; 100] }),
    );
    let addr = spawn_server(app).await;

    let location = Location::parse(&format!("http://{}/repo/timestamp.json", addr));
    let data = fetcher("").fetch(&location, 100, TIMEOUT).await.unwrap();
    assert_eq!(data.len(), 100);
}

#[tokio::test]
async fn test_remote_timeout() {
    let app = Router::new().route(
        "/repo/timestamp.json",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        }),
    );
    let addr = spawn_server(app).await;

    let location = Location::parse(&format!("http://{}/repo/timestamp.json", addr));
    let err = fetcher("")
        .fetch(&location, 100, Duration::from_millis(200))
        .await
        .unwrap_err();
    match err {
        FetchError::Request { source, .. } => assert!(source.is_timeout()),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_execute_uses_request_tag() {
    let seen_tag: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let seen = seen_tag.clone();
    let app = Router::new().route(
        "/repo/root.json",
        get(move |headers: HeaderMap| {
            let seen = seen.clone();
            async move {
                *seen.lock().unwrap() = headers
                    .get("x-ats-tags")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                "{}"
            }
        }),
    );
    let addr = spawn_server(app).await;

    let request = FetchRequest::new(
        Location::parse(&format!("http://{}/repo/root.json", addr)),
        10,
        TIMEOUT,
        "devel",
    )
    .unwrap();
    let data = fetcher("main").execute(&request).await.unwrap();
    assert_eq!(&data[..], b"{}");
    assert_eq!(seen_tag.lock().unwrap().as_deref(), Some("devel"));
}
