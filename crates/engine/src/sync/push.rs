// SPDX-License-Identifier: MIT

//! The push half of a sync cycle: send every pending local change, in
//! order, and apply the server's verdict to each.
//!
//! Push order is document creates, updates, deletes, then attachment
//! creates, updates, deletes. Changes are sent one at a time, so at most
//! one request is in flight per id.

use crate::error::EngineError;
use crate::shared::Shared;
use crate::sync::records::reason_from_wire;
use aiq_core::{Attachment, Clock, Document, Event, RejectionReason, SyncStatus};
use aiq_transport::{HttpAdapter, HttpRequest, HttpResponse, Method};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Header carrying the expected revision on update/delete pushes.
pub const REVISION_HEADER: &str = "X-AIQ-Revision";
/// Header scoping an attachment push to one solution.
pub const SOLUTION_HEADER: &str = "X-AIQ-Solution";

pub(crate) async fn push<H: HttpAdapter, C: Clock>(
    shared: &Arc<Shared<H, C>>,
    solution: &str,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    let documents = shared.store.with_tx(|tx| tx.pending_documents(solution))?;
    for document in documents {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        push_document(shared, document, cancel).await?;
    }
    let attachments = shared.store.with_tx(|tx| tx.pending_attachments(solution))?;
    for attachment in attachments {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        push_attachment(shared, attachment, cancel).await?;
    }
    Ok(())
}

async fn push_document<H: HttpAdapter, C: Clock>(
    shared: &Arc<Shared<H, C>>,
    document: Document,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    // a delete that never reached the server has nothing to revoke
    if document.status == SyncStatus::Deleted && document.revision.is_none() {
        purge_document(shared, &document)?;
        return Ok(());
    }

    let upload = shared.auth.link(aiq_core::LinkRole::Upload)?;
    let body = json!({
        "solution": document.solution,
        "type": document.doc_type,
        "id": document.id,
        "revision": document.revision,
        "fields": Value::Object(document.fields.clone()),
    });
    let request = match document.status {
        SyncStatus::Created => HttpRequest::post(upload).json(&body),
        SyncStatus::Updated => {
            HttpRequest::new(Method::Put, item_url(&upload, &document.id)).json(&body)
        }
        SyncStatus::Deleted => {
            let mut request = HttpRequest::new(Method::Delete, item_url(&upload, &document.id))
                .header(SOLUTION_HEADER, document.solution.as_str());
            if let Some(revision) = &document.revision {
                request = request.header(REVISION_HEADER, revision.as_str());
            }
            request
        }
        // pending_documents never returns these
        SyncStatus::Synchronized | SyncStatus::Rejected => return Ok(()),
    };

    let creating = document.status == SyncStatus::Created;
    let deleting = document.status == SyncStatus::Deleted;
    let response = shared.auth.send_authorized(request, cancel).await?;

    if response.is_success() {
        if deleting {
            purge_document(shared, &document)?;
        } else {
            let revision = revision_from(&response);
            let mut synced = document.clone();
            synced.status = SyncStatus::Synchronized;
            synced.rejection_reason = None;
            synced.revision = revision.or(synced.revision);
            shared.store.with_tx(|tx| tx.put_document(&synced))?;
            shared.bus.emit(Event::DocumentSynchronized {
                id: document.id.clone(),
                doc_type: document.doc_type.clone(),
                solution: document.solution.clone(),
            });
        }
        return Ok(());
    }

    if (400..500).contains(&response.status) {
        let reason = reason_from_response(response.status, &response.body, creating);
        let mut rejected = document.clone();
        rejected.status = SyncStatus::Rejected;
        rejected.rejection_reason = Some(reason);
        // rejected rows stay visible, deletes included, for inspection
        shared.store.with_tx(|tx| tx.put_document(&rejected))?;
        shared.bus.emit(Event::DocumentRejected {
            id: document.id.clone(),
            doc_type: document.doc_type.clone(),
            solution: document.solution.clone(),
            reason,
        });
        return Ok(());
    }

    // 5xx: the change stays pending for the next cycle
    Err(EngineError::BackendUnavailable { status: Some(response.status) })
}

async fn push_attachment<H: HttpAdapter, C: Clock>(
    shared: &Arc<Shared<H, C>>,
    attachment: Attachment,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    if attachment.status == SyncStatus::Deleted && attachment.revision.is_none() {
        purge_attachment(shared, &attachment)?;
        return Ok(());
    }

    let link = shared.auth.link(aiq_core::LinkRole::Attachments)?;
    let url = attachment_url(&link, &attachment.doc_id, &attachment.name);
    let request = match attachment.status {
        SyncStatus::Created | SyncStatus::Updated => {
            let relative = attachment.relative_path();
            let bytes = match shared.blobs.read(&relative) {
                Ok(bytes) => bytes,
                Err(err) => {
                    // a local change without its blob cannot be pushed;
                    // leave it pending and let the next cycle retry
                    tracing::warn!(
                        doc_id = %attachment.doc_id,
                        name = %attachment.name,
                        error = %err,
                        "attachment blob unreadable, skipping push"
                    );
                    return Ok(());
                }
            };
            let method = if attachment.status == SyncStatus::Created {
                Method::Post
            } else {
                Method::Put
            };
            let mut request = HttpRequest::new(method, url)
                .header(SOLUTION_HEADER, attachment.solution.as_str())
                .header("Content-Type", attachment.content_type.as_str());
            if let Some(revision) = &attachment.revision {
                request = request.header(REVISION_HEADER, revision.as_str());
            }
            request.body = Some(bytes);
            request
        }
        SyncStatus::Deleted => {
            let mut request = HttpRequest::new(Method::Delete, url)
                .header(SOLUTION_HEADER, attachment.solution.as_str());
            if let Some(revision) = &attachment.revision {
                request = request.header(REVISION_HEADER, revision.as_str());
            }
            request
        }
        SyncStatus::Synchronized | SyncStatus::Rejected => return Ok(()),
    };

    let creating = attachment.status == SyncStatus::Created;
    let deleting = attachment.status == SyncStatus::Deleted;
    let response = shared.auth.send_authorized(request, cancel).await?;

    if response.is_success() {
        if deleting {
            purge_attachment(shared, &attachment)?;
        } else {
            let mut synced = attachment.clone();
            synced.status = SyncStatus::Synchronized;
            synced.rejection_reason = None;
            synced.revision = revision_from(&response).or(synced.revision);
            shared.store.with_tx(|tx| tx.put_attachment(&synced))?;
            shared.bus.emit(Event::AttachmentSynchronized {
                name: attachment.name.clone(),
                doc_id: attachment.doc_id.clone(),
                doc_type: attachment.doc_type.clone(),
                solution: attachment.solution.clone(),
            });
        }
        return Ok(());
    }

    if (400..500).contains(&response.status) {
        let reason = reason_from_response(response.status, &response.body, creating);
        let mut rejected = attachment.clone();
        rejected.status = SyncStatus::Rejected;
        rejected.rejection_reason = Some(reason);
        shared.store.with_tx(|tx| tx.put_attachment(&rejected))?;
        shared.bus.emit(Event::AttachmentRejected {
            name: attachment.name.clone(),
            doc_id: attachment.doc_id.clone(),
            doc_type: attachment.doc_type.clone(),
            solution: attachment.solution.clone(),
            reason,
        });
        return Ok(());
    }

    Err(EngineError::BackendUnavailable { status: Some(response.status) })
}

fn purge_document<H: HttpAdapter, C: Clock>(
    shared: &Arc<Shared<H, C>>,
    document: &Document,
) -> Result<(), EngineError> {
    shared.store.with_tx(|tx| {
        tx.delete_document(&document.solution, &document.id)?;
        tx.delete_attachments_for_document(&document.solution, &document.id)
    })?;
    if let Err(err) = shared.blobs.remove_document(&document.solution, &document.id) {
        tracing::warn!(id = %document.id, error = %err, "blob cleanup failed");
    }
    Ok(())
}

fn purge_attachment<H: HttpAdapter, C: Clock>(
    shared: &Arc<Shared<H, C>>,
    attachment: &Attachment,
) -> Result<(), EngineError> {
    shared.store.with_tx(|tx| {
        tx.delete_attachment(&attachment.solution, &attachment.doc_id, &attachment.name)
    })?;
    if let Err(err) = shared.blobs.remove(&attachment.relative_path()) {
        tracing::warn!(name = %attachment.name, error = %err, "blob cleanup failed");
    }
    Ok(())
}

fn item_url(base: &str, id: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), id)
}

fn attachment_url(base: &str, doc_id: &str, name: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), doc_id, name)
}

fn revision_from(response: &HttpResponse) -> Option<String> {
    response
        .json()
        .ok()
        .and_then(|body| body.get("revision").and_then(Value::as_str).map(str::to_string))
}

/// Map a push rejection to its typed reason.
///
/// 404 is ambiguous between document and type; the body's `reason` field
/// disambiguates when present.
pub(crate) fn reason_from_response(status: u16, body: &[u8], creating: bool) -> RejectionReason {
    match status {
        403 => RejectionReason::PermissionDenied,
        404 => match body_reason(body) {
            Some(RejectionReason::TypeNotFound) => RejectionReason::TypeNotFound,
            _ => RejectionReason::DocumentNotFound,
        },
        409 => {
            if creating {
                RejectionReason::CreateConflict
            } else {
                RejectionReason::UpdateConflict
            }
        }
        413 => RejectionReason::LargeAttachment,
        423 => RejectionReason::RestrictedType,
        _ => RejectionReason::Unknown,
    }
}

fn body_reason(body: &[u8]) -> Option<RejectionReason> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value.get("reason").and_then(Value::as_str).map(reason_from_wire)
}

#[cfg(test)]
#[path = "push_tests.rs"]
mod tests;
