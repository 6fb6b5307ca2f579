// SPDX-License-Identifier: MIT

//! The pull half of a sync cycle: long-poll the data-sync stream and apply
//! every change record in one transaction.
//!
//! Conflict policy lives in [`resolve_remote`], the single chokepoint:
//! a remote create/update loses to a pending local change (the record is
//! deferred and re-applied once push clears the conflict); a remote delete
//! always wins.

use crate::downloader::Downloader;
use crate::error::EngineError;
use crate::shared::{optional, Shared};
use crate::sync::records::{self, AttachmentRecord, ChangeRecord};
use crate::{launchables, messaging};
use aiq_core::{
    sanitize_fields, Attachment, AttachmentState, Clock, Document, Event, SyncStatus,
};
use aiq_storage::Tx;
use aiq_transport::{HttpAdapter, HttpRequest};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Header carrying the opaque pull cursor on requests.
pub const SINCE_HEADER: &str = "X-AIQ-Since";
/// Header carrying the next cursor on responses.
pub const CURSOR_HEADER: &str = "X-AIQ-Cursor";
/// Header scoping a pull to one solution.
pub const SOLUTION_HEADER: &str = "X-AIQ-Solution";

/// Reserved document type carrying server-originated messages.
pub const MESSAGE_TYPE: &str = "_message";
/// Reserved document type carrying launchable manifests.
pub const LAUNCHABLE_TYPE: &str = "_launchable";

pub(crate) fn cursor_key(solution: &str) -> String {
    format!("sync.cursor.{solution}")
}

#[derive(Debug, Default)]
pub(crate) struct PullOutcome {
    pub gone: bool,
    pub applied: usize,
}

/// Everything one applied batch produced, carried out of the transaction.
#[derive(Default)]
pub(crate) struct AppliedBatch {
    pub events: Vec<Event>,
    pub downloads: Vec<Attachment>,
    /// Documents purged in this batch; their blobs are removed after commit.
    pub purged: Vec<(String, String)>,
}

pub(crate) async fn pull<H: HttpAdapter, C: Clock>(
    shared: &Arc<Shared<H, C>>,
    downloader: &Arc<Downloader<H, C>>,
    solution: &str,
    cancel: &CancellationToken,
) -> Result<PullOutcome, EngineError> {
    let link = shared.auth.link(aiq_core::LinkRole::StartDataSync)?;
    let cursor = shared.store.with_tx(|tx| tx.property(&cursor_key(solution)))?;

    let mut request = HttpRequest::get(link)
        .timeout(shared.config.pull_timeout())
        .header(SOLUTION_HEADER, solution);
    if let Some(cursor) = &cursor {
        request = request.header(SINCE_HEADER, cursor.as_str());
    }

    let response = shared.auth.send_authorized(request, cancel).await?;
    let next_cursor = response.header(CURSOR_HEADER).map(str::to_string);
    match response.status {
        200 => {}
        204 => {
            if let Some(cursor) = next_cursor {
                shared
                    .store
                    .with_tx(|tx| tx.set_property(&cursor_key(solution), &cursor))?;
            }
            return Ok(PullOutcome::default());
        }
        status => return Err(EngineError::BackendUnavailable { status: Some(status) }),
    }

    let records = records::parse_stream(&response.body);
    if records.iter().any(|r| matches!(r, ChangeRecord::Gone {})) {
        return Ok(PullOutcome { gone: true, applied: 0 });
    }

    let applied = records.len();
    let batch = shared.store.with_tx(|tx| {
        let mut batch = AppliedBatch::default();
        for record in records {
            apply_record(tx, record, &mut batch)?;
        }
        if let Some(cursor) = &next_cursor {
            tx.set_property(&cursor_key(solution), cursor)?;
        }
        Ok(batch)
    })?;
    finish_batch(shared, downloader, batch);
    tracing::debug!(solution, applied, "pull applied");
    Ok(PullOutcome { gone: false, applied })
}

/// Re-apply remote records that lost an earlier client-wins conflict.
///
/// Records whose document is still pending (the push failed) go back on
/// the deferred queue.
pub(crate) fn apply_deferred<H: HttpAdapter, C: Clock>(
    shared: &Arc<Shared<H, C>>,
    downloader: &Arc<Downloader<H, C>>,
    solution: &str,
) -> Result<(), EngineError> {
    let batch = shared.store.with_tx(|tx| {
        let mut batch = AppliedBatch::default();
        for (doc_id, value) in tx.take_deferred(solution)? {
            let Ok(record) = serde_json::from_value::<ChangeRecord>(value.clone()) else {
                tracing::warn!(solution, %doc_id, "dropping unparseable deferred record");
                continue;
            };
            let still_pending = optional(tx.document(solution, &doc_id))?
                .map(|d| d.status.is_pending())
                .unwrap_or(false);
            if still_pending {
                tx.defer_change(solution, &doc_id, &value)?;
            } else {
                apply_record(tx, record, &mut batch)?;
            }
        }
        Ok(batch)
    })?;
    finish_batch(shared, downloader, batch);
    Ok(())
}

fn finish_batch<H: HttpAdapter, C: Clock>(
    shared: &Arc<Shared<H, C>>,
    downloader: &Arc<Downloader<H, C>>,
    batch: AppliedBatch,
) {
    for (solution, doc_id) in &batch.purged {
        if let Err(err) = shared.blobs.remove_document(solution, doc_id) {
            tracing::warn!(solution, doc_id, error = %err, "blob cleanup failed");
        }
    }
    shared.bus.emit_all(batch.events);
    for attachment in batch.downloads {
        downloader.request(attachment);
    }
}

/// Apply one change record inside the pull transaction.
pub(crate) fn apply_record(
    tx: &Tx<'_>,
    record: ChangeRecord,
    out: &mut AppliedBatch,
) -> Result<(), aiq_storage::StorageError> {
    match record {
        ChangeRecord::Create { solution, doc_type, id, revision, fields, attachments }
        | ChangeRecord::Update { solution, doc_type, id, revision, fields, attachments } => {
            apply_upsert(tx, &solution, &doc_type, &id, &revision, fields, attachments, out)
        }
        ChangeRecord::Delete { solution, doc_type, id } => {
            apply_delete(tx, &solution, &doc_type, &id, out)
        }
        ChangeRecord::Rejected { solution, doc_type, id, reason } => {
            let Some(mut local) = optional(tx.document(&solution, &id))? else {
                return Ok(());
            };
            let reason = records::reason_from_wire(&reason);
            local.status = SyncStatus::Rejected;
            local.rejection_reason = Some(reason);
            tx.put_document(&local)?;
            out.events.push(Event::DocumentRejected { id, doc_type, solution, reason });
            Ok(())
        }
        ChangeRecord::Attachment {
            solution,
            doc_type,
            doc_id,
            name,
            revision,
            content_type,
            resource_url,
            length,
        } => {
            let record = AttachmentRecord { name, revision, content_type, resource_url, length };
            ingest_attachment(tx, &solution, &doc_type, &doc_id, record, out)
        }
        ChangeRecord::Status { id, status, reason, response } => {
            messaging::apply_status(tx, &id, &status, reason, response, out)
        }
        ChangeRecord::Gone {} => Ok(()),
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_upsert(
    tx: &Tx<'_>,
    solution: &str,
    doc_type: &str,
    id: &str,
    revision: &str,
    fields: Map<String, Value>,
    attachments: Vec<AttachmentRecord>,
    out: &mut AppliedBatch,
) -> Result<(), aiq_storage::StorageError> {
    match doc_type {
        MESSAGE_TYPE => {
            messaging::ingest_inbound(tx, id, solution, revision, &fields, &mut out.events)?
        }
        LAUNCHABLE_TYPE => launchables::ingest(tx, id, solution, &fields, &mut out.events)?,
        _ => {
            let existing = optional(tx.document(solution, id))?;
            match resolve_remote(existing.as_ref(), revision) {
                Resolution::Defer => {
                    let record = ChangeRecord::Update {
                        solution: solution.to_string(),
                        doc_type: doc_type.to_string(),
                        id: id.to_string(),
                        revision: revision.to_string(),
                        fields,
                        attachments: attachments.clone(),
                    };
                    tracing::debug!(solution, id, "remote change deferred, client wins");
                    tx.defer_change(
                        solution,
                        id,
                        &serde_json::to_value(&record).unwrap_or(Value::Null),
                    )?;
                    return Ok(());
                }
                Resolution::Skip => {}
                Resolution::Apply => {
                    let doc = Document {
                        id: id.to_string(),
                        doc_type: doc_type.to_string(),
                        solution: solution.to_string(),
                        revision: Some(revision.to_string()),
                        status: SyncStatus::Synchronized,
                        rejection_reason: None,
                        fields: sanitize_fields(fields),
                    };
                    tx.put_document(&doc)?;
                    out.events.push(if existing.is_some() {
                        Event::DocumentUpdated {
                            id: id.to_string(),
                            doc_type: doc_type.to_string(),
                            solution: solution.to_string(),
                        }
                    } else {
                        Event::DocumentCreated {
                            id: id.to_string(),
                            doc_type: doc_type.to_string(),
                            solution: solution.to_string(),
                        }
                    });
                }
            }
        }
    }
    for attachment in attachments {
        ingest_attachment(tx, solution, doc_type, id, attachment, out)?;
    }
    Ok(())
}

enum Resolution {
    Apply,
    Skip,
    Defer,
}

/// The conflict chokepoint for remote create/update records.
fn resolve_remote(local: Option<&Document>, revision: &str) -> Resolution {
    match local {
        // client wins: the local pending change stays, the remote record
        // waits for push to clear it
        Some(local) if local.status.is_pending() => Resolution::Defer,
        // already at this revision: sync is idempotent, no write, no event
        Some(local)
            if local.status == SyncStatus::Synchronized
                && local.revision.as_deref() == Some(revision) =>
        {
            Resolution::Skip
        }
        _ => Resolution::Apply,
    }
}

fn apply_delete(
    tx: &Tx<'_>,
    solution: &str,
    doc_type: &str,
    id: &str,
    out: &mut AppliedBatch,
) -> Result<(), aiq_storage::StorageError> {
    match doc_type {
        MESSAGE_TYPE => {
            messaging::remove_inbound(tx, id)?;
            Ok(())
        }
        LAUNCHABLE_TYPE => launchables::remove(tx, id, &mut out.events),
        _ => {
            // remote delete always wins, including over a local update
            if tx.delete_document(solution, id)? {
                tx.delete_attachments_for_document(solution, id)?;
                out.purged.push((solution.to_string(), id.to_string()));
                out.events.push(Event::DocumentDeleted {
                    id: id.to_string(),
                    doc_type: doc_type.to_string(),
                    solution: solution.to_string(),
                });
            }
            Ok(())
        }
    }
}

pub(crate) fn ingest_attachment(
    tx: &Tx<'_>,
    solution: &str,
    doc_type: &str,
    doc_id: &str,
    record: AttachmentRecord,
    out: &mut AppliedBatch,
) -> Result<(), aiq_storage::StorageError> {
    let existing = optional(tx.attachment(solution, doc_id, &record.name))?;
    if let Some(existing) = &existing {
        if existing.revision.as_deref() == Some(record.revision.as_str()) {
            return Ok(());
        }
        if existing.status.is_pending() {
            // local attachment change pending; push resolves it first
            tracing::debug!(solution, doc_id, name = %record.name, "attachment change deferred");
            return Ok(());
        }
    }
    let attachment = Attachment {
        solution: solution.to_string(),
        doc_id: doc_id.to_string(),
        doc_type: doc_type.to_string(),
        name: record.name.clone(),
        content_type: record.content_type,
        revision: Some(record.revision),
        status: SyncStatus::Synchronized,
        // a fresh revision invalidates any local blob, including one in
        // the terminal Failed state
        state: AttachmentState::Unavailable,
        resource_url: Some(record.resource_url),
        file_path: None,
        length: record.length,
        rejection_reason: None,
    };
    tx.put_attachment(&attachment)?;
    out.events.push(if existing.is_some() {
        Event::AttachmentUpdated {
            name: attachment.name.clone(),
            doc_id: doc_id.to_string(),
            doc_type: doc_type.to_string(),
            solution: solution.to_string(),
        }
    } else {
        Event::AttachmentCreated {
            name: attachment.name.clone(),
            doc_id: doc_id.to_string(),
            doc_type: doc_type.to_string(),
            solution: solution.to_string(),
        }
    });
    out.events.push(Event::AttachmentUnavailable {
        name: attachment.name.clone(),
        doc_id: doc_id.to_string(),
        doc_type: doc_type.to_string(),
        solution: solution.to_string(),
    });
    out.downloads.push(attachment);
    Ok(())
}

#[cfg(test)]
#[path = "pull_tests.rs"]
mod tests;
