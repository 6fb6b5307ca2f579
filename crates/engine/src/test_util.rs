// SPDX-License-Identifier: MIT

//! Fixtures shared by the engine's unit tests.

use crate::auth::AuthHandle;
use crate::bus::NotificationBus;
use crate::config::EngineConfig;
use crate::shared::Shared;
use aiq_core::{FakeClock, LinkDirectory, SequentialIdGen};
use aiq_storage::{BlobStore, DataStore};
use aiq_transport::test_support::FakeHttpAdapter;
use aiq_transport::AuthResponse;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const BASE_URL: &str = "https://platform.test/token";

pub fn links() -> LinkDirectory {
    LinkDirectory::from_value(&json!({
        "logout": "https://platform.test/logout",
        "comessage": "https://platform.test/comessage",
        "direct": "https://platform.test/direct",
        "startdatasync": "https://platform.test/sync",
        "download": "https://platform.test/download",
        "upload": "https://platform.test/upload",
        "attachments": "https://platform.test/attachments",
        "push": "https://platform.test/push",
    }))
}

pub fn auth_body(token: &str) -> serde_json::Value {
    json!({
        "access_token": token,
        "expires_in": 3600,
        "links": {
            "logout": "https://platform.test/logout",
            "comessage": "https://platform.test/comessage",
            "direct": "https://platform.test/direct",
            "startdatasync": "https://platform.test/sync",
            "download": "https://platform.test/download",
            "upload": "https://platform.test/upload",
            "attachments": "https://platform.test/attachments",
            "push": "https://platform.test/push",
        },
        "user": {"username": "alice", "solutions": ["sol"]},
    })
}

pub struct TestWorld {
    pub shared: Arc<Shared<FakeHttpAdapter, FakeClock>>,
    pub http: FakeHttpAdapter,
    pub clock: FakeClock,
    pub cancel: CancellationToken,
    _dir: TempDir,
}

/// A shared engine context with an installed token and scripted HTTP.
pub fn world() -> TestWorld {
    let dir = tempfile::tempdir().expect("tempdir");
    let http = FakeHttpAdapter::new();
    let clock = FakeClock::new();
    let bus = NotificationBus::start();
    let cancel = CancellationToken::new();
    let config = EngineConfig::new(BASE_URL, dir.path());

    let store = DataStore::open(&dir.path().join(aiq_storage::DB_FILE)).expect("store");
    let blobs = BlobStore::open(dir.path().join("attachments")).expect("blobs");

    let auth = AuthHandle::new(
        http.clone(),
        BASE_URL.to_string(),
        config.request_timeout,
        bus.clone(),
        cancel.clone(),
        dir.path().join(crate::session::SESSION_FILE),
    );
    auth.install(
        AuthResponse {
            access_token: "tok-0".into(),
            expires_in: Some(3600),
            links: links(),
            user: json!({"username": "alice", "solutions": ["sol"]}),
        },
        Some(aiq_transport::Credentials::new("alice", "pw", "acme")),
    );

    let shared = Arc::new(Shared {
        config,
        clock: clock.clone(),
        store,
        blobs,
        bus,
        auth,
        ids: Arc::new(SequentialIdGen::default()),
        cancel: cancel.clone(),
    });
    TestWorld { shared, http, clock, cancel, _dir: dir }
}
