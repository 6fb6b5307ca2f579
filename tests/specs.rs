// SPDX-License-Identifier: MIT

//! End-to-end scenarios: a real session against a mock platform.
//!
//! Each test opens a session over the reqwest adapter, scripts the server
//! with wiremock, and observes the engine through the notification bus.
//! Server phases are sequenced with `MockServer::reset` so long-poll
//! cycles cannot race the assertions.

use aiq_core::{Event, EventKind, RejectionReason, SystemClock};
use aiq_engine::{EngineConfig, SendMessageParams, Session};
use aiq_transport::{Credentials, ReqwestAdapter};
use serde_json::{json, Map, Value};
use serial_test::serial;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type TestSession = Session<ReqwestAdapter, SystemClock>;

const WAIT: Duration = Duration::from_secs(15);

fn auth_body(server: &MockServer) -> Value {
    let base = server.uri();
    json!({
        "access_token": "tok-1",
        "expires_in": 3600,
        "links": {
            "logout": format!("{base}/logout"),
            "comessage": format!("{base}/comessage"),
            "direct": format!("{base}/direct"),
            "startdatasync": format!("{base}/sync"),
            "download": format!("{base}/download"),
            "upload": format!("{base}/upload"),
            "attachments": format!("{base}/attachments"),
            "push": format!("{base}/push"),
        },
        "user": {"username": "alice", "solutions": ["A"]},
    })
}

fn ndjson(records: &[Value]) -> String {
    let mut body = String::new();
    for record in records {
        body.push_str(&record.to_string());
        body.push('\n');
    }
    body
}

fn stream_response(cursor: &str, records: &[Value]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("X-AIQ-Cursor", cursor)
        .set_body_string(ndjson(records))
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body(server)))
        .mount(server)
        .await;
}

async fn mount_idle_sync(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
}

async fn open_session(server: &MockServer, dir: &TempDir) -> TestSession {
    mount_token(server).await;
    let config = EngineConfig::new(format!("{}/token", server.uri()), dir.path())
        .poll_interval(Duration::from_millis(50))
        .sync_interval(Duration::from_millis(150))
        .message_batch_interval(Duration::from_millis(200))
        .request_timeout(Duration::from_secs(5))
        .long_poll_window(Duration::from_secs(1));
    let http = ReqwestAdapter::new(Duration::from_secs(5)).expect("adapter");
    Session::open(config, http, SystemClock, Credentials::new("alice", "pw", "acme"))
        .await
        .expect("session opens")
}

async fn next_event(rx: &mut UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(WAIT, rx.recv()).await.expect("event in time").expect("bus alive")
}

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[tokio::test]
#[serial]
async fn pull_creates_a_document() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/sync"))
        .respond_with(stream_response(
            "c1",
            &[json!({
                "op": "create", "solution": "A", "type": "t", "id": "d1",
                "revision": "r1", "fields": {"x": 1}, "attachments": [],
            })],
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_idle_sync(&server).await;

    let session = open_session(&server, &dir).await;
    let mut events = session.subscribe([EventKind::DocumentCreated]);

    match next_event(&mut events).await {
        Event::DocumentCreated { id, doc_type, solution } => {
            assert_eq!(id, "d1");
            assert_eq!(doc_type, "t");
            assert_eq!(solution, "A");
        }
        other => panic!("unexpected event {other:?}"),
    }

    let record = session.document("A", "d1").unwrap();
    assert_eq!(record["x"], json!(1));
    assert_eq!(record["_status"], json!("synchronized"));
    assert_eq!(record["_rev"], json!("r1"));

    session.close().await;
}

#[tokio::test]
#[serial]
async fn local_create_pushes_and_synchronizes() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_idle_sync(&server).await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"revision": "r2"})))
        .mount(&server)
        .await;

    let session = open_session(&server, &dir).await;
    let mut events = session.subscribe([EventKind::DocumentSynchronized]);

    let record = session.create_document("A", "t", fields(json!({"k": "v"}))).unwrap();
    let id = record["_id"].as_str().unwrap().to_string();

    match next_event(&mut events).await {
        Event::DocumentSynchronized { id: synced, .. } => assert_eq!(synced, id),
        other => panic!("unexpected event {other:?}"),
    }
    let record = session.document("A", &id).unwrap();
    assert_eq!(record["_status"], json!("synchronized"));
    assert_eq!(record["_rev"], json!("r2"));

    session.close().await;
}

#[tokio::test]
#[serial]
async fn push_conflict_rejects_then_remote_update_clears_it() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/sync"))
        .respond_with(stream_response(
            "c1",
            &[json!({
                "op": "create", "solution": "A", "type": "t", "id": "d1",
                "revision": "r1", "fields": {"x": 1},
            })],
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_idle_sync(&server).await;

    let session = open_session(&server, &dir).await;
    let mut created = session.subscribe([EventKind::DocumentCreated]);
    next_event(&mut created).await;

    // hold the scheduler while the server and the local state change
    session.pause_scheduler();
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/sync"))
        .respond_with(stream_response(
            "c2",
            &[json!({
                "op": "update", "solution": "A", "type": "t", "id": "d1",
                "revision": "r3", "fields": {"x": 3},
            })],
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_idle_sync(&server).await;
    Mock::given(method("PUT"))
        .and(path("/upload/d1"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;
    session.update_document("A", "d1", fields(json!({"x": 2}))).unwrap();

    // next cycle: the pull carries a newer remote revision (client wins,
    // deferred), the push collides, the deferred record then applies
    let mut rejected = session.subscribe([EventKind::DocumentRejected]);
    let mut updated = session.subscribe([EventKind::DocumentUpdated]);
    session.resume_scheduler();

    match next_event(&mut rejected).await {
        Event::DocumentRejected { id, reason, .. } => {
            assert_eq!(id, "d1");
            assert_eq!(reason, RejectionReason::UpdateConflict);
        }
        other => panic!("unexpected event {other:?}"),
    }
    // the deferred remote revision replaces the rejected local state
    loop {
        match next_event(&mut updated).await {
            Event::DocumentUpdated { id, .. } if id == "d1" => {
                let record = session.document("A", "d1").unwrap();
                if record["_rev"] == json!("r3") {
                    assert_eq!(record["x"], json!(3));
                    assert_eq!(record["_status"], json!("synchronized"));
                    assert!(record.get("_rejection_reason").is_none());
                    break;
                }
            }
            _ => {}
        }
    }

    session.close().await;
}

#[tokio::test]
#[serial]
async fn attachment_downloads_after_pull() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let payload = vec![42u8; 1024];
    Mock::given(method("GET"))
        .and(path("/sync"))
        .respond_with(stream_response(
            "c1",
            &[
                json!({
                    "op": "create", "solution": "A", "type": "t", "id": "d1",
                    "revision": "r1", "fields": {},
                }),
                json!({
                    "op": "attachment", "solution": "A", "type": "t", "doc_id": "d1",
                    "name": "a.png", "revision": "ar1", "content_type": "image/png",
                    "resource_url": "/blobs/a.png", "length": 1024,
                }),
            ],
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_idle_sync(&server).await;
    Mock::given(method("GET"))
        .and(path("/download/blobs/a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&server)
        .await;

    let session = open_session(&server, &dir).await;
    let mut events = session.subscribe([EventKind::AttachmentAvailable]);

    match next_event(&mut events).await {
        Event::AttachmentAvailable { name, doc_id, solution, .. } => {
            assert_eq!(name, "a.png");
            assert_eq!(doc_id, "d1");
            assert_eq!(solution, "A");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(session.attachment_data("A", "d1", "a.png").unwrap(), payload);
    let attachment = session.attachment("A", "d1", "a.png").unwrap();
    assert_eq!(attachment.state, aiq_core::AttachmentState::Available);

    session.close().await;
}

#[tokio::test]
#[serial]
async fn message_delivery_walks_queued_accepted_delivered() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_idle_sync(&server).await;
    Mock::given(method("POST"))
        .and(path("/comessage"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let session = open_session(&server, &dir).await;
    let mut queued = session.subscribe([EventKind::MessageQueued]);
    let mut accepted = session.subscribe([EventKind::MessageAccepted]);
    let mut delivered = session.subscribe([EventKind::MessageDelivered]);

    let message = session
        .send_message(
            SendMessageParams::new("dest", json!({"x": 1})).urgent(true).expect_response(true),
        )
        .unwrap();

    match next_event(&mut queued).await {
        Event::MessageQueued { id, destination } => {
            assert_eq!(id, message.id);
            assert_eq!(destination, "dest");
        }
        other => panic!("unexpected event {other:?}"),
    }
    next_event(&mut accepted).await;
    assert_eq!(
        session.status_of_message(&message.id).unwrap().state,
        aiq_core::OutboundState::Accepted
    );

    // the delivery report arrives on the pull channel
    session.pause_scheduler();
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/sync"))
        .respond_with(stream_response(
            "c2",
            &[json!({"op": "status", "id": message.id, "status": "delivered"})],
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_idle_sync(&server).await;
    session.resume_scheduler();

    next_event(&mut delivered).await;
    // expect_response keeps the terminal row for inspection
    assert_eq!(
        session.status_of_message(&message.id).unwrap().state,
        aiq_core::OutboundState::Delivered
    );

    session.close().await;
}

#[tokio::test]
#[serial]
async fn gone_resets_and_refetches_without_losing_rows() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/sync"))
        .respond_with(stream_response(
            "c1",
            &[json!({
                "op": "create", "solution": "A", "type": "t", "id": "d1",
                "revision": "r1", "fields": {"x": 1},
            })],
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_idle_sync(&server).await;

    let session = open_session(&server, &dir).await;
    let mut created = session.subscribe([EventKind::DocumentCreated]);
    next_event(&mut created).await;

    // the server forgets us; the engine resets and refetches in one cycle
    let mut updated = session.subscribe([EventKind::DocumentUpdated]);
    session.pause_scheduler();
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/sync"))
        .respond_with(stream_response("c2", &[json!({"op": "gone"})]))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sync"))
        .respond_with(stream_response(
            "c3",
            &[json!({
                "op": "create", "solution": "A", "type": "t", "id": "d1",
                "revision": "r1", "fields": {"x": 1},
            })],
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_idle_sync(&server).await;
    session.resume_scheduler();

    next_event(&mut updated).await;
    let record = session.document("A", "d1").unwrap();
    assert_eq!(record["_rev"], json!("r1"));
    assert_eq!(record["x"], json!(1));
    assert_eq!(record["_status"], json!("synchronized"));

    session.close().await;
}
