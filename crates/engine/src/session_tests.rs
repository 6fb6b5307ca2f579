// SPDX-License-Identifier: MIT

use super::*;
use crate::test_util::{auth_body, BASE_URL};
use aiq_core::{FakeClock, RejectionReason};
use aiq_transport::test_support::{FakeHttpAdapter, FakeResponse};
use serde_json::json;
use serial_test::serial;
use tempfile::TempDir;

type TestSession = Session<FakeHttpAdapter, FakeClock>;

fn config(dir: &TempDir) -> EngineConfig {
    // park the scheduler so tests drive everything explicitly
    EngineConfig::new(BASE_URL, dir.path()).poll_interval(Duration::from_secs(3600))
}

async fn open_session(dir: &TempDir) -> (TestSession, FakeHttpAdapter, FakeClock) {
    let http = FakeHttpAdapter::new();
    let clock = FakeClock::new();
    http.enqueue(BASE_URL, FakeResponse::json(200, &auth_body("tok-1")));
    let session = Session::open(
        config(dir),
        http.clone(),
        clock.clone(),
        Credentials::new("alice", "pw", "acme"),
    )
    .await
    .unwrap();
    (session, http, clock)
}

fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[tokio::test]
#[serial]
async fn open_authenticates_and_persists_resumable_state() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _http, _clock) = open_session(&dir).await;

    assert!(session.is_open());
    assert_eq!(session.username(), "alice");
    assert_eq!(session.user_info().username(), Some("alice"));
    assert_eq!(session.solutions().unwrap(), vec!["sol".to_string()]);

    let file = SessionFile::load(&SessionFile::path(dir.path())).unwrap();
    assert_eq!(file.access_token.as_deref(), Some("tok-1"));
    assert_eq!(file.known_sessions, vec!["alice".to_string()]);
    assert!(file.links.url(aiq_core::LinkRole::Upload).is_some());

    session.close().await;
}

#[tokio::test]
#[serial]
async fn open_splits_credential_and_availability_failures() {
    let dir = tempfile::tempdir().unwrap();
    let http = FakeHttpAdapter::new();
    http.enqueue(BASE_URL, FakeResponse::status(401));
    let err = Session::open(
        config(&dir),
        http,
        FakeClock::new(),
        Credentials::new("alice", "wrong", "acme"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::CredentialsError));

    let http = FakeHttpAdapter::new();
    http.enqueue(BASE_URL, FakeResponse::status(503));
    let err = Session::open(
        config(&dir),
        http,
        FakeClock::new(),
        Credentials::new("alice", "pw", "acme"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::BackendUnavailable { status: Some(503) }));

    // nothing listening at all
    let err = Session::open(
        config(&dir),
        FakeHttpAdapter::new(),
        FakeClock::new(),
        Credentials::new("alice", "pw", "acme"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::BackendUnavailable { status: None }));
}

#[tokio::test]
#[serial]
async fn only_one_session_opens_per_process() {
    let dir = tempfile::tempdir().unwrap();
    let (session, http, _clock) = open_session(&dir).await;

    http.enqueue(BASE_URL, FakeResponse::json(200, &auth_body("tok-2")));
    let other_dir = tempfile::tempdir().unwrap();
    let err = Session::open(
        config(&other_dir),
        http.clone(),
        FakeClock::new(),
        Credentials::new("bob", "pw", "acme"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::SessionAlreadyOpen));

    session.close().await;
}

#[tokio::test]
#[serial]
async fn close_purges_the_token_and_blocks_further_calls() {
    let dir = tempfile::tempdir().unwrap();
    let (session, http, _clock) = open_session(&dir).await;
    let mut events = session.subscribe([aiq_core::EventKind::SessionClosed]);
    http.enqueue("https://platform.test/logout", FakeResponse::status(204));

    session.close().await;

    assert!(matches!(events.recv().await, Some(Event::SessionClosed {})));
    assert!(!session.is_open());
    assert!(!TestSession::can_resume(&config(&dir)));
    let err = session.document("sol", "d1").unwrap_err();
    assert_eq!(err.kind(), aiq_core::ErrorKind::InvalidArgument);

    // closing twice is harmless
    session.close().await;
}

#[tokio::test]
#[serial]
async fn resume_rehydrates_without_network() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (session, _http, _clock) = open_session(&dir).await;
        session
            .create_document("sol", "com.example.note", obj(json!({"k": "v"})))
            .unwrap();
        // simulate a crash: drop without close
        drop(session);
    }
    // give the dropped session's guards a moment to unwind
    tokio::time::sleep(Duration::from_millis(50)).await;

    let cfg = config(&dir);
    assert!(TestSession::can_resume(&cfg));
    let http = FakeHttpAdapter::new();
    let session = Session::resume(cfg, http.clone(), FakeClock::new()).await.unwrap();

    assert!(session.is_open());
    assert_eq!(session.username(), "alice");
    // no network traffic during resume
    assert!(http.requests().is_empty());

    // documents survived byte for byte
    let mut seen = Vec::new();
    session
        .documents_of_type("sol", "com.example.note", |record| {
            seen.push(record);
            Ok(())
        })
        .unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["k"], json!("v"));
    assert_eq!(seen[0]["_status"], json!("created"));

    session.close().await;
}

#[tokio::test]
#[serial]
async fn resume_without_state_fails() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    assert!(!TestSession::can_resume(&cfg));
    let err = Session::resume(cfg, FakeHttpAdapter::new(), FakeClock::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::NothingToResume));
}

#[tokio::test]
#[serial]
async fn local_document_lifecycle_walks_the_state_machine() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _http, _clock) = open_session(&dir).await;
    let (shared, ..) = session.testing_parts();

    // create
    let record = session
        .create_document("sol", "com.example.note", obj(json!({"k": "v", "_rev": "forged"})))
        .unwrap();
    let id = record["_id"].as_str().unwrap().to_string();
    assert_eq!(record["_status"], json!("created"));
    assert!(record.get("_rev").is_none());

    // update keeps Created until first sync
    let record = session.update_document("sol", &id, obj(json!({"k": "v2"}))).unwrap();
    assert_eq!(record["_status"], json!("created"));
    assert_eq!(record["k"], json!("v2"));

    // synchronized documents go back to Updated on write
    shared
        .store
        .with_tx(|tx| {
            let mut doc = tx.document("sol", &id)?;
            doc.status = SyncStatus::Synchronized;
            doc.revision = Some("r1".into());
            tx.put_document(&doc)
        })
        .unwrap();
    let record = session.update_document("sol", &id, obj(json!({"extra": 1}))).unwrap();
    assert_eq!(record["_status"], json!("updated"));
    assert_eq!(record["k"], json!("v2"));
    assert_eq!(record["extra"], json!(1));

    // a write clears a rejection
    shared
        .store
        .with_tx(|tx| {
            let mut doc = tx.document("sol", &id)?;
            doc.status = SyncStatus::Rejected;
            doc.rejection_reason = Some(RejectionReason::UpdateConflict);
            tx.put_document(&doc)
        })
        .unwrap();
    let record = session.update_document("sol", &id, obj(json!({"fixed": true}))).unwrap();
    assert_eq!(record["_status"], json!("updated"));
    assert!(record.get("_rejection_reason").is_none());

    // null removes a key
    let record = session.update_document("sol", &id, obj(json!({"extra": null}))).unwrap();
    assert!(record.get("extra").is_none());

    // delete marks synced documents and hides them from reads
    session.delete_document("sol", &id).unwrap();
    assert!(session.document("sol", &id).is_err());
    assert!(!session.document_exists("sol", &id).unwrap());
    let raw = shared.store.with_tx(|tx| tx.document("sol", &id)).unwrap();
    assert_eq!(raw.status, SyncStatus::Deleted);

    session.close().await;
}

#[tokio::test]
#[serial]
async fn deleting_a_never_synced_document_purges_silently() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _http, _clock) = open_session(&dir).await;
    let (shared, ..) = session.testing_parts();

    let record = session.create_document("sol", "com.example.note", Map::new()).unwrap();
    let id = record["_id"].as_str().unwrap().to_string();
    session.delete_document("sol", &id).unwrap();

    assert!(!shared.store.with_tx(|tx| tx.document_exists("sol", &id)).unwrap());
    session.close().await;
}

#[tokio::test]
#[serial]
async fn local_documents_never_enter_the_push_queue() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _http, _clock) = open_session(&dir).await;
    let (shared, ..) = session.testing_parts();

    let record = session
        .create_local_document("sol", "com.example.draft", obj(json!({"k": "v"})))
        .unwrap();
    let id = record["_id"].as_str().unwrap().to_string();
    assert_eq!(record["_status"], json!("synchronized"));
    assert!(shared.store.with_tx(|tx| tx.pending_documents("sol")).unwrap().is_empty());

    let record = session.update_local_document("sol", &id, obj(json!({"k": "v2"}))).unwrap();
    assert_eq!(record["_status"], json!("synchronized"));
    assert_eq!(record["k"], json!("v2"));
    assert!(shared.store.with_tx(|tx| tx.pending_documents("sol")).unwrap().is_empty());

    // the synchronized-document API refuses to touch it
    let err = session.update_document("sol", &id, obj(json!({"x": 1}))).unwrap_err();
    assert_eq!(err.kind(), aiq_core::ErrorKind::InvalidArgument);
    let err = session.delete_document("sol", &id).unwrap_err();
    assert_eq!(err.kind(), aiq_core::ErrorKind::InvalidArgument);

    session.delete_local_document("sol", &id).unwrap();
    assert!(!session.document_exists("sol", &id).unwrap());

    session.close().await;
}

#[tokio::test]
#[serial]
async fn reserved_types_are_off_limits_to_the_application() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _http, _clock) = open_session(&dir).await;

    let err = session.create_document("sol", "_message", Map::new()).unwrap_err();
    assert_eq!(err.kind(), aiq_core::ErrorKind::InvalidArgument);
    let err = session.create_document("sol", "", Map::new()).unwrap_err();
    assert_eq!(err.kind(), aiq_core::ErrorKind::InvalidArgument);

    session.close().await;
}

#[tokio::test]
#[serial]
async fn attachment_lifecycle_on_a_local_document() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _http, _clock) = open_session(&dir).await;

    let record = session.create_document("sol", "com.example.note", Map::new()).unwrap();
    let id = record["_id"].as_str().unwrap().to_string();

    let attachment = session
        .create_attachment("sol", &id, "a.txt", "text/plain", b"hello")
        .unwrap();
    assert_eq!(attachment.status, SyncStatus::Created);
    assert_eq!(attachment.state, AttachmentState::Available);
    assert_eq!(session.attachment_data("sol", &id, "a.txt").unwrap(), b"hello");

    // duplicate names are caller bugs
    let err = session.create_attachment("sol", &id, "a.txt", "text/plain", b"x").unwrap_err();
    assert_eq!(err.kind(), aiq_core::ErrorKind::InvalidArgument);

    let updated = session
        .update_attachment("sol", &id, "a.txt", "text/plain", b"hello world")
        .unwrap();
    assert_eq!(updated.status, SyncStatus::Created);
    assert_eq!(updated.length, 11);

    // never-synced attachments purge on delete
    session.delete_attachment("sol", &id, "a.txt").unwrap();
    assert!(session.attachment("sol", &id, "a.txt").is_err());
    assert!(session.attachments_for_document("sol", &id).unwrap().is_empty());

    session.close().await;
}

#[tokio::test]
#[serial]
async fn attachment_data_requires_availability() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _http, _clock) = open_session(&dir).await;
    let (shared, ..) = session.testing_parts();

    shared
        .store
        .with_tx(|tx| {
            tx.put_attachment(&Attachment {
                solution: "sol".into(),
                doc_id: "d1".into(),
                doc_type: "t".into(),
                name: "pending.bin".into(),
                content_type: "application/octet-stream".into(),
                revision: Some("ar1".into()),
                status: SyncStatus::Synchronized,
                state: AttachmentState::Unavailable,
                resource_url: Some("/blobs/p".into()),
                file_path: None,
                length: 4,
                rejection_reason: None,
            })
        })
        .unwrap();

    let err = session.attachment_data("sol", "d1", "pending.bin").unwrap_err();
    assert_eq!(err.kind(), aiq_core::ErrorKind::ResourceNotFound);

    session.close().await;
}

#[tokio::test]
#[serial]
async fn urgent_message_flushes_through_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let (session, http, _clock) = open_session(&dir).await;
    let mut events = session.subscribe([aiq_core::EventKind::MessageAccepted]);
    http.enqueue("https://platform.test/comessage", FakeResponse::status(200));

    let message = session
        .send_message(SendMessageParams::new("dest", json!({"x": 1})).urgent(true))
        .unwrap();

    match events.recv().await {
        Some(Event::MessageAccepted { id, .. }) => assert_eq!(id, message.id),
        other => panic!("unexpected event {other:?}"),
    }
    session.close().await;
}

#[tokio::test]
#[serial]
async fn direct_call_prefixes_the_direct_link() {
    let dir = tempfile::tempdir().unwrap();
    let (session, http, _clock) = open_session(&dir).await;
    http.enqueue(
        "https://platform.test/direct/reports",
        FakeResponse::body(200, b"report-body".to_vec()),
    );

    let response = session
        .direct_call(
            DirectCallRequest::new("GET", "/reports").parameter("from", "2026-01-01"),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"report-body");

    let request = &http.requests_to("https://platform.test/direct/reports")[0];
    assert!(request.url.ends_with("?from=2026-01-01"));
    assert!(request.headers.iter().any(|(k, _)| k == "Authorization"));

    let err = session.direct_call(DirectCallRequest::new("PATCH", "/x")).await.unwrap_err();
    assert_eq!(err.code, aiq_core::ErrorKind::InvalidArgument.code());
    assert_eq!(err.domain, crate::direct::ERROR_DOMAIN);

    session.close().await;
}
