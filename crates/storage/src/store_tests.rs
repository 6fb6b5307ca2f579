// SPDX-License-Identifier: MIT

use super::*;
use aiq_core::ErrorKind;
use serde_json::json;

fn store() -> DataStore {
    DataStore::open_in_memory().unwrap()
}

fn doc(solution: &str, id: &str, doc_type: &str, status: SyncStatus) -> Document {
    Document {
        id: id.into(),
        doc_type: doc_type.into(),
        solution: solution.into(),
        revision: None,
        status,
        rejection_reason: None,
        fields: match json!({"n": id}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        },
    }
}

fn attachment(solution: &str, doc_id: &str, name: &str, status: SyncStatus) -> Attachment {
    Attachment {
        solution: solution.into(),
        doc_id: doc_id.into(),
        doc_type: "t".into(),
        name: name.into(),
        content_type: "application/octet-stream".into(),
        revision: None,
        status,
        state: AttachmentState::Unavailable,
        resource_url: None,
        file_path: None,
        length: 0,
        rejection_reason: None,
    }
}

#[test]
fn document_roundtrip_and_missing_lookup() {
    let store = store();
    let original = doc("sol", "d1", "t", SyncStatus::Created);
    store.with_tx(|tx| tx.put_document(&original)).unwrap();

    let loaded = store.with_tx(|tx| tx.document("sol", "d1")).unwrap();
    assert_eq!(loaded, original);

    let err = store.with_tx(|tx| tx.document("sol", "nope")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IdNotFound);
}

#[test]
fn documents_are_scoped_by_solution() {
    let store = store();
    store
        .with_tx(|tx| {
            tx.put_document(&doc("a", "d1", "t", SyncStatus::Synchronized))?;
            tx.put_document(&doc("b", "d1", "t", SyncStatus::Created))
        })
        .unwrap();
    let in_a = store.with_tx(|tx| tx.document("a", "d1")).unwrap();
    let in_b = store.with_tx(|tx| tx.document("b", "d1")).unwrap();
    assert_eq!(in_a.status, SyncStatus::Synchronized);
    assert_eq!(in_b.status, SyncStatus::Created);
}

#[test]
fn failing_processor_rolls_back_the_transaction() {
    let store = store();
    let result = store.with_tx(|tx| {
        tx.put_document(&doc("sol", "d1", "t", SyncStatus::Created))?;
        tx.documents_of_type("sol", "t", |_| {
            Err(StorageError::InvalidArgument("abort".into()))
        })
    });
    assert!(result.is_err());
    // the insert in the same transaction was rolled back
    assert!(!store.with_tx(|tx| tx.document_exists("sol", "d1")).unwrap());
}

#[test]
fn pending_documents_come_back_in_push_order() {
    let store = store();
    store
        .with_tx(|tx| {
            tx.put_document(&doc("sol", "z-del", "t", SyncStatus::Deleted))?;
            tx.put_document(&doc("sol", "a-upd", "t", SyncStatus::Updated))?;
            tx.put_document(&doc("sol", "m-new", "t", SyncStatus::Created))?;
            tx.put_document(&doc("sol", "done", "t", SyncStatus::Synchronized))?;
            tx.put_document(&doc("sol", "bad", "t", SyncStatus::Rejected))
        })
        .unwrap();
    let pending = store.with_tx(|tx| tx.pending_documents("sol")).unwrap();
    let ids: Vec<&str> = pending.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["m-new", "a-upd", "z-del"]);
}

#[test]
fn local_documents_never_appear_in_pending() {
    let store = store();
    store
        .with_tx(|tx| {
            tx.put_local_document(&doc("sol", "l1", "t", SyncStatus::Created))?;
            tx.put_document(&doc("sol", "d1", "t", SyncStatus::Created))
        })
        .unwrap();
    let pending = store.with_tx(|tx| tx.pending_documents("sol")).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "d1");
    // but they read back like any other document
    assert!(store.with_tx(|tx| tx.document_exists("sol", "l1")).unwrap());
    assert!(store.with_tx(|tx| tx.document_is_local("sol", "l1")).unwrap());
    assert!(!store.with_tx(|tx| tx.document_is_local("sol", "d1")).unwrap());
    let err = store.with_tx(|tx| tx.document_is_local("sol", "ghost")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IdNotFound);
}

#[test]
fn null_revisions_clears_documents_and_attachments() {
    let store = store();
    store
        .with_tx(|tx| {
            let mut d = doc("sol", "d1", "t", SyncStatus::Synchronized);
            d.revision = Some("r1".into());
            tx.put_document(&d)?;
            let mut a = attachment("sol", "d1", "a.png", SyncStatus::Synchronized);
            a.revision = Some("ar1".into());
            tx.put_attachment(&a)
        })
        .unwrap();
    store.with_tx(|tx| tx.null_revisions("sol")).unwrap();
    assert_eq!(store.with_tx(|tx| tx.document("sol", "d1")).unwrap().revision, None);
    assert_eq!(store.with_tx(|tx| tx.attachment("sol", "d1", "a.png")).unwrap().revision, None);
}

#[test]
fn attachment_roundtrip_and_pending_order() {
    let store = store();
    store
        .with_tx(|tx| {
            tx.put_attachment(&attachment("sol", "d1", "upd", SyncStatus::Updated))?;
            tx.put_attachment(&attachment("sol", "d1", "new", SyncStatus::Created))?;
            tx.put_attachment(&attachment("sol", "d1", "del", SyncStatus::Deleted))?;
            tx.put_attachment(&attachment("sol", "d1", "ok", SyncStatus::Synchronized))
        })
        .unwrap();
    let pending = store.with_tx(|tx| tx.pending_attachments("sol")).unwrap();
    let names: Vec<&str> = pending.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, ["new", "upd", "del"]);

    let err = store.with_tx(|tx| tx.attachment("sol", "d1", "ghost")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NameNotFound);
}

#[test]
fn unavailable_attachments_filters_by_state() {
    let store = store();
    store
        .with_tx(|tx| {
            let mut available = attachment("sol", "d1", "have", SyncStatus::Synchronized);
            available.state = AttachmentState::Available;
            tx.put_attachment(&available)?;
            tx.put_attachment(&attachment("sol", "d1", "need", SyncStatus::Synchronized))
        })
        .unwrap();
    let unavailable = store.with_tx(|tx| tx.unavailable_attachments("sol")).unwrap();
    assert_eq!(unavailable.len(), 1);
    assert_eq!(unavailable[0].name, "need");
}

fn outbound(id: &str, destination: &str, state: OutboundState, created_at: u64) -> OutboundMessage {
    OutboundMessage {
        id: id.into(),
        destination: destination.into(),
        payload: json!({"x": 1}),
        attachments: vec![],
        from_launchable: None,
        urgent: false,
        expect_response: false,
        state,
        response_body: None,
        failure_reason: None,
        created_at,
    }
}

#[test]
fn outbound_queue_is_fifo_per_destination() {
    let store = store();
    store
        .with_tx(|tx| {
            tx.insert_outbound(&outbound("m2", "dest", OutboundState::Queued, 200))?;
            tx.insert_outbound(&outbound("m1", "dest", OutboundState::Queued, 100))?;
            tx.insert_outbound(&outbound("m3", "other", OutboundState::Queued, 50))?;
            tx.insert_outbound(&outbound("m4", "dest", OutboundState::Accepted, 10))
        })
        .unwrap();

    let queued = store.with_tx(|tx| tx.queued_outbound("dest")).unwrap();
    let ids: Vec<&str> = queued.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m1", "m2"]);

    let destinations = store.with_tx(|tx| tx.queued_destinations()).unwrap();
    assert_eq!(destinations, ["dest", "other"]);
}

#[test]
fn outbound_update_and_delete() {
    let store = store();
    store
        .with_tx(|tx| tx.insert_outbound(&outbound("m1", "dest", OutboundState::Queued, 1)))
        .unwrap();

    let mut msg = store.with_tx(|tx| tx.outbound("m1")).unwrap();
    msg.state = OutboundState::Accepted;
    msg.response_body = Some(json!({"ok": true}));
    store.with_tx(|tx| tx.update_outbound(&msg)).unwrap();

    let loaded = store.with_tx(|tx| tx.outbound("m1")).unwrap();
    assert_eq!(loaded.state, OutboundState::Accepted);
    assert_eq!(loaded.response_body, Some(json!({"ok": true})));

    assert!(store.with_tx(|tx| tx.delete_outbound("m1")).unwrap());
    let err = store.with_tx(|tx| tx.outbound("m1")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IdNotFound);
}

fn inbound(id: &str, active_from: u64, ttl: u64) -> InboundMessage {
    InboundMessage {
        id: id.into(),
        message_type: "com.example.alert".into(),
        solution: "sol".into(),
        revision: Some("r1".into()),
        payload: json!({"text": id}),
        text: String::new(),
        created: active_from,
        active_from,
        time_to_live: ttl,
        urgent: false,
        sound: None,
        vibrate: false,
        read: false,
        relevance: None,
    }
}

#[test]
fn inbound_expiry_scan() {
    let store = store();
    store
        .with_tx(|tx| {
            tx.put_inbound(&inbound("old", 1_000, 1))?;
            tx.put_inbound(&inbound("fresh", 1_000, 3600))
        })
        .unwrap();
    let expired = store.with_tx(|tx| tx.expired_inbound(10_000)).unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, "old");
    assert_eq!(store.with_tx(|tx| tx.min_time_to_live()).unwrap(), Some(1));
}

#[test]
fn inbound_mark_read_only_once() {
    let store = store();
    store.with_tx(|tx| tx.put_inbound(&inbound("m1", 0, 60))).unwrap();
    assert!(store.with_tx(|tx| tx.mark_inbound_read("m1")).unwrap());
    assert!(!store.with_tx(|tx| tx.mark_inbound_read("m1")).unwrap());
    let err = store.with_tx(|tx| tx.mark_inbound_read("ghost")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IdNotFound);
}

#[test]
fn session_properties_get_set_remove() {
    let store = store();
    assert_eq!(store.with_tx(|tx| tx.property("cursor")).unwrap(), None);
    store.with_tx(|tx| tx.set_property("cursor", "abc")).unwrap();
    store.with_tx(|tx| tx.set_property("cursor", "def")).unwrap();
    assert_eq!(store.with_tx(|tx| tx.property("cursor")).unwrap(), Some("def".into()));
    store.with_tx(|tx| tx.remove_property("cursor")).unwrap();
    assert_eq!(store.with_tx(|tx| tx.property("cursor")).unwrap(), None);
}

#[test]
fn deferred_changes_replace_and_drain() {
    let store = store();
    store
        .with_tx(|tx| {
            tx.defer_change("sol", "d1", &json!({"rev": "r1"}))?;
            tx.defer_change("sol", "d1", &json!({"rev": "r2"}))?;
            tx.defer_change("sol", "d2", &json!({"rev": "x"}))
        })
        .unwrap();

    let drained = store.with_tx(|tx| tx.take_deferred("sol")).unwrap();
    assert_eq!(drained.len(), 2);
    assert_eq!(drained[0], ("d1".into(), json!({"rev": "r2"})));
    assert!(store.with_tx(|tx| tx.take_deferred("sol")).unwrap().is_empty());
}

#[test]
fn launchable_roundtrip() {
    let store = store();
    let launchable = Launchable {
        id: "l1".into(),
        name: "Maps".into(),
        solution: "sol".into(),
        icon_path: None,
        available: true,
    };
    store.with_tx(|tx| tx.put_launchable(&launchable)).unwrap();
    assert_eq!(store.with_tx(|tx| tx.launchable("l1")).unwrap(), launchable);
    assert_eq!(store.with_tx(|tx| tx.launchables()).unwrap().len(), 1);
    assert!(store.with_tx(|tx| tx.delete_launchable("l1")).unwrap());
    let err = store.with_tx(|tx| tx.launchable("l1")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IdNotFound);
}

#[test]
fn multi_row_write_is_atomic() {
    let store = store();
    let result: Result<(), StorageError> = store.with_tx(|tx| {
        tx.put_document(&doc("sol", "d1", "t", SyncStatus::Created))?;
        tx.put_document(&doc("sol", "d2", "t", SyncStatus::Created))?;
        Err(StorageError::InvalidArgument("boom".into()))
    });
    assert!(result.is_err());
    assert!(!store.with_tx(|tx| tx.document_exists("sol", "d1")).unwrap());
    assert!(!store.with_tx(|tx| tx.document_exists("sol", "d2")).unwrap());
}
