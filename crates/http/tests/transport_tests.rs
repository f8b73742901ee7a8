//! Integration tests for the reqwest transport against a local socket

use netkit_core::{
    DownloadProgress, RequestMethod, RequestPriority, RequestSerializerType, TransportAdapter,
    TransportRequest,
};
use netkit_http::ReqwestTransport;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accept one connection, answer with `status_line` and `body`, and return
/// the raw request head
async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    serve_with(status_line, "", body).await
}

/// Like [`serve_once`], with extra header lines (each ending in CRLF)
async fn serve_with(
    status_line: &'static str,
    extra_headers: &'static str,
    body: &'static str,
) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            head.extend_from_slice(&chunk[..n]);
            if head.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\n{extra_headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        String::from_utf8_lossy(&head).into_owned()
    });
    (format!("http://{addr}"), handle)
}

fn transport() -> ReqwestTransport {
    ReqwestTransport::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
}

fn get(url: String) -> TransportRequest {
    TransportRequest {
        url,
        method: RequestMethod::Get,
        headers: BTreeMap::new(),
        authorization: None,
        argument: None,
        body: None,
        serializer: RequestSerializerType::Http,
        timeout: Duration::from_secs(5),
        allows_cellular_access: true,
        priority: RequestPriority::Default,
        download_path: None,
        download_progress: None,
    }
}

/// Progress observer that records every report
fn recorder() -> (DownloadProgress, Arc<Mutex<Vec<(u64, Option<u64>)>>>) {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    let progress = DownloadProgress::new(move |written, total| {
        sink.lock().unwrap().push((written, total));
    });
    (progress, reports)
}

#[tokio::test]
async fn test_get_returns_status_headers_and_body() {
    let (base, server) = serve_once("200 OK", r#"{"ok":true}"#).await;
    let mut request = get(format!("{base}/v1/items"));
    request.argument = Some(json!({"page": 2}));
    request.headers.insert("x-client".into(), "tests".into());

    let response = transport().execute(&request).await.unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(&response.body[..], br#"{"ok":true}"#);
    assert_eq!(
        response.headers.get("content-type").map(String::as_str),
        Some("application/json")
    );

    let head = server.await.unwrap();
    assert!(head.starts_with("GET /v1/items?page=2 HTTP/1.1\r\n"));
    assert!(head.to_ascii_lowercase().contains("x-client: tests"));
}

#[tokio::test]
async fn test_error_status_is_a_response() {
    let (base, _server) = serve_once("404 Not Found", r#"{"error":"missing"}"#).await;
    let response = transport().execute(&get(base)).await.unwrap();
    assert_eq!(response.status_code, 404);
    assert_eq!(&response.body[..], br#"{"error":"missing"}"#);
}

#[tokio::test]
async fn test_download_is_written_to_path() {
    let (base, _server) = serve_once("200 OK", "file contents").await;
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("nested").join("file.bin");

    let mut request = get(base);
    request.download_path = Some(target.clone());
    let response = transport().execute(&request).await.unwrap();

    assert_eq!(response.status_code, 200);
    assert!(response.body.is_empty());
    assert_eq!(std::fs::read(&target).unwrap(), b"file contents");
    assert!(!dir.path().join("nested").join("file.bin.part").exists());
}

#[tokio::test]
async fn test_download_reports_progress() {
    let (base, _server) = serve_once("200 OK", "file contents").await;
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("file.bin");
    let (progress, reports) = recorder();

    let mut request = get(base);
    request.download_path = Some(target.clone());
    request.download_progress = Some(progress);
    transport().execute(&request).await.unwrap();

    let reports = reports.lock().unwrap();
    assert_eq!(reports.last(), Some(&(13, Some(13))));
    assert!(reports.windows(2).all(|w| w[0].0 <= w[1].0));
}

#[tokio::test]
async fn test_partial_download_is_resumed_with_range() {
    let (base, server) = serve_with(
        "206 Partial Content",
        "Content-Range: bytes 5-12/13\r\n",
        "contents",
    )
    .await;
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("file.bin");
    std::fs::write(dir.path().join("file.bin.part"), "file ").unwrap();
    let (progress, reports) = recorder();

    let mut request = get(base);
    request.download_path = Some(target.clone());
    request.download_progress = Some(progress);
    let response = transport().execute(&request).await.unwrap();

    assert_eq!(response.status_code, 206);
    assert_eq!(std::fs::read(&target).unwrap(), b"file contents");
    assert!(!dir.path().join("file.bin.part").exists());
    assert_eq!(reports.lock().unwrap().last(), Some(&(13, Some(13))));

    let head = server.await.unwrap().to_ascii_lowercase();
    assert!(head.contains("range: bytes=5-\r\n"));
}

#[tokio::test]
async fn test_full_response_replaces_stale_partial() {
    let (base, server) = serve_once("200 OK", "file contents").await;
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("file.bin");
    std::fs::write(dir.path().join("file.bin.part"), "stale bytes from elsewhere").unwrap();

    let mut request = get(base);
    request.download_path = Some(target.clone());
    transport().execute(&request).await.unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"file contents");
    assert!(server.await.unwrap().to_ascii_lowercase().contains("range: bytes=26-"));
}

#[tokio::test]
async fn test_unsatisfiable_range_discards_partial() {
    let (base, _server) = serve_once("416 Range Not Satisfiable", "").await;
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("file.bin");
    let partial = dir.path().join("file.bin.part");
    std::fs::write(&partial, "too long").unwrap();

    let mut request = get(base);
    request.download_path = Some(target.clone());
    let response = transport().execute(&request).await.unwrap();

    assert_eq!(response.status_code, 416);
    assert!(!partial.exists());
    assert!(!target.exists());
}

#[tokio::test]
async fn test_interrupted_download_keeps_partial() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\nfirst half")
            .await
            .unwrap();
        let _ = socket.shutdown().await;
    });
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("file.bin");

    let mut request = get(format!("http://{addr}/big"));
    request.download_path = Some(target.clone());
    assert!(transport().execute(&request).await.is_err());

    assert!(!target.exists());
    assert_eq!(
        std::fs::read(dir.path().join("file.bin.part")).unwrap(),
        b"first half"
    );
}

#[tokio::test]
async fn test_failed_download_keeps_body_in_memory() {
    let (base, _server) = serve_once("500 Internal Server Error", "broken").await;
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("file.bin");

    let mut request = get(base);
    request.download_path = Some(target.clone());
    let response = transport().execute(&request).await.unwrap();

    assert_eq!(response.status_code, 500);
    assert_eq!(&response.body[..], b"broken");
    assert!(!target.exists());
}

#[tokio::test]
async fn test_timeout_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _server = tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let mut request = get(format!("http://{addr}/slow"));
    request.timeout = Duration::from_millis(100);
    let err = transport().execute(&request).await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_connection_refused() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let err = transport()
        .execute(&get(format!("http://{addr}/")))
        .await
        .unwrap_err();
    assert!(!err.is_timeout());
    assert!(err.to_string().contains("HTTP request failed"));
}
