// SPDX-License-Identifier: MIT

//! Integration tests for the reqwest-backed adapter against a mock server.

use aiq_transport::{HttpAdapter, HttpRequest, ReqwestAdapter};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn adapter() -> ReqwestAdapter {
    ReqwestAdapter::new(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn send_attaches_headers_and_buffers_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("Authorization", "Bearer tok"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-AIQ-Cursor", "c42")
                .set_body_string("line1\nline2\n"),
        )
        .mount(&server)
        .await;

    let request = HttpRequest::get(format!("{}/data", server.uri())).bearer("tok");
    let response = adapter().send(request, &CancellationToken::new()).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.header("x-aiq-cursor"), Some("c42"));
    assert_eq!(response.body, b"line1\nline2\n");
}

#[tokio::test]
async fn send_returns_error_statuses_as_responses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(409).set_body_string("conflict"))
        .mount(&server)
        .await;

    let request = HttpRequest::post(format!("{}/upload", server.uri()));
    let response = adapter().send(request, &CancellationToken::new()).await.unwrap();
    assert_eq!(response.status, 409);
    assert_eq!(response.text(), "conflict");
}

#[tokio::test]
async fn send_maps_connect_failure_to_connection_fault() {
    // nothing listens on this port
    let request = HttpRequest::get("http://127.0.0.1:1/never");
    let err = adapter().send(request, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), aiq_core::ErrorKind::ConnectionFault);
}

#[tokio::test]
async fn cancelled_token_aborts_send() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let request = HttpRequest::get(format!("{}/slow", server.uri()));
    let err = adapter().send(request, &cancel).await.unwrap_err();
    assert!(matches!(err, aiq_transport::TransportError::Cancelled));
}

#[tokio::test]
async fn download_streams_chunks_to_sink() {
    let server = MockServer::start().await;
    let payload = vec![7u8; 4096];
    Mock::given(method("GET"))
        .and(path("/blob"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&server)
        .await;

    let mut collected = Vec::new();
    let request = HttpRequest::get(format!("{}/blob", server.uri()));
    let (status, streamed) = adapter()
        .download(request, &CancellationToken::new(), &mut |chunk| {
            collected.extend_from_slice(chunk);
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(status, 200);
    assert_eq!(streamed, 4096);
    assert_eq!(collected, payload);
}

#[tokio::test]
async fn download_skips_sink_on_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let mut called = false;
    let request = HttpRequest::get(format!("{}/gone", server.uri()));
    let (status, streamed) = adapter()
        .download(request, &CancellationToken::new(), &mut |_| {
            called = true;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(status, 410);
    assert_eq!(streamed, 0);
    assert!(!called);
}

#[tokio::test]
async fn request_timeout_overrides_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let request =
        HttpRequest::get(format!("{}/slow", server.uri())).timeout(Duration::from_millis(100));
    let err = adapter().send(request, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), aiq_core::ErrorKind::ConnectionFault);
}
