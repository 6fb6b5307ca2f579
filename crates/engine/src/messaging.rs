// SPDX-License-Identifier: MIT

//! The message pipeline.
//!
//! Server-originated messages ride the data-sync stream as a reserved
//! document type and live until their visibility window closes.
//! Client-originated messages queue locally, coalesce per destination
//! unless urgent, and walk the delivery state machine as status records
//! arrive on the pull channel.

use crate::error::EngineError;
use crate::queue::{Operation, OperationQueue};
use crate::shared::{optional, Shared};
use crate::sync::pull::AppliedBatch;
use crate::sync::push::reason_from_response;
use aiq_core::{
    AttachmentDescriptor, Clock, Event, InboundMessage, OutboundMessage, OutboundState,
    GLOBAL_SOLUTION,
};
use aiq_storage::{StorageError, Tx};
use aiq_transport::{HttpAdapter, HttpRequest};
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default visibility window when the server omits a time-to-live: 30 days.
const DEFAULT_TTL_SECS: u64 = 30 * 24 * 3600;

/// What the application supplies to [`send`](Messaging::send).
#[derive(Debug, Clone)]
pub struct SendMessageParams {
    pub destination: String,
    pub payload: Value,
    pub attachments: Vec<(AttachmentDescriptor, Vec<u8>)>,
    pub from_launchable: Option<String>,
    pub urgent: bool,
    pub expect_response: bool,
}

impl SendMessageParams {
    pub fn new(destination: impl Into<String>, payload: Value) -> Self {
        Self {
            destination: destination.into(),
            payload,
            attachments: Vec::new(),
            from_launchable: None,
            urgent: false,
            expect_response: false,
        }
    }

    pub fn attach(mut self, name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        let descriptor = AttachmentDescriptor {
            name: name.into(),
            content_type: content_type.into(),
            length: bytes.len() as u64,
        };
        self.attachments.push((descriptor, bytes));
        self
    }

    aiq_core::setters! {
        set { urgent: bool, expect_response: bool }
        option { from_launchable: String }
    }
}

pub(crate) struct Messaging<H: HttpAdapter, C: Clock> {
    shared: Arc<Shared<H, C>>,
    queue: OperationQueue,
}

impl<H: HttpAdapter, C: Clock> Messaging<H, C> {
    pub fn new(shared: Arc<Shared<H, C>>, queue: OperationQueue) -> Arc<Self> {
        Arc::new(Self { shared, queue })
    }

    /// Queue a client-originated message. Urgent messages flush their
    /// destination immediately; others wait for the batching tick.
    pub fn send(self: &Arc<Self>, params: SendMessageParams) -> Result<OutboundMessage, EngineError> {
        if params.destination.is_empty() {
            return Err(EngineError::InvalidArgument("destination must not be empty".into()));
        }
        let message = OutboundMessage {
            id: self.shared.ids.next_id(),
            destination: params.destination.clone(),
            payload: params.payload,
            attachments: params.attachments.iter().map(|(d, _)| d.clone()).collect(),
            from_launchable: params.from_launchable,
            urgent: params.urgent,
            expect_response: params.expect_response,
            state: OutboundState::Queued,
            response_body: None,
            failure_reason: None,
            created_at: self.shared.clock.unix_ms(),
        };
        for (descriptor, bytes) in &params.attachments {
            self.shared.blobs.write(&blob_path(&message.id, &descriptor.name), bytes)?;
        }
        if let Err(err) = self.shared.store.with_tx(|tx| tx.insert_outbound(&message)) {
            let _ = self.shared.blobs.remove_document(GLOBAL_SOLUTION, &message.id);
            return Err(err.into());
        }
        self.shared.bus.emit(Event::MessageQueued {
            id: message.id.clone(),
            destination: message.destination.clone(),
        });
        if params.urgent {
            self.submit_flush(&params.destination);
        }
        Ok(message)
    }

    /// Submit one flush operation per destination with queued messages.
    /// Fired by the scheduler's batching tick.
    pub fn schedule_batches(self: &Arc<Self>) {
        let destinations = match self.shared.store.with_tx(|tx| tx.queued_destinations()) {
            Ok(destinations) => destinations,
            Err(err) => {
                tracing::warn!(error = %err, "cannot list queued destinations");
                return;
            }
        };
        for destination in destinations {
            self.submit_flush(&destination);
        }
    }

    fn submit_flush(self: &Arc<Self>, destination: &str) {
        let op = SendMessagesOperation {
            messaging: Arc::clone(self),
            destination: destination.to_string(),
        };
        if let Err(err) = self.queue.submit(Box::new(op)) {
            tracing::warn!(destination, error = %err, "message flush not queued");
        }
    }

    /// Send every queued message for one destination, in order.
    async fn flush_destination(
        &self,
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let link = self.shared.auth.link(aiq_core::LinkRole::CoMessage)?;
        let queued = self.shared.store.with_tx(|tx| tx.queued_outbound(destination))?;
        for message in queued {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let body = self.submission_body(&message)?;
            let request = HttpRequest::post(link.clone()).json(&body);
            let response = self.shared.auth.send_authorized(request, cancel).await?;

            if response.is_success() {
                if message.expect_response {
                    let mut accepted = message.clone();
                    accepted.state = OutboundState::Accepted;
                    self.shared.store.with_tx(|tx| tx.update_outbound(&accepted))?;
                } else {
                    self.purge(&message)?;
                }
                self.shared.bus.emit(Event::MessageAccepted {
                    id: message.id.clone(),
                    destination: destination.to_string(),
                });
                continue;
            }

            if (400..500).contains(&response.status) {
                let reason = reason_from_response(response.status, &response.body, false);
                if message.expect_response {
                    let mut rejected = message.clone();
                    rejected.state = OutboundState::Rejected;
                    rejected.failure_reason = Some(reason.to_string());
                    self.shared.store.with_tx(|tx| tx.update_outbound(&rejected))?;
                } else {
                    self.purge(&message)?;
                }
                self.shared.bus.emit(Event::MessageRejected {
                    id: message.id.clone(),
                    destination: destination.to_string(),
                    reason,
                });
                continue;
            }

            // 5xx: everything still queued waits for the next batch tick
            return Err(EngineError::BackendUnavailable { status: Some(response.status) });
        }
        Ok(())
    }

    /// The submission payload: descriptors plus inline base64 bodies.
    fn submission_body(&self, message: &OutboundMessage) -> Result<Value, EngineError> {
        let mut attachments = Vec::new();
        for descriptor in &message.attachments {
            let bytes = self.shared.blobs.read(&blob_path(&message.id, &descriptor.name))?;
            attachments.push(json!({
                "name": descriptor.name,
                "content_type": descriptor.content_type,
                "data": base64::engine::general_purpose::STANDARD.encode(bytes),
            }));
        }
        Ok(json!({
            "id": message.id,
            "destination": message.destination,
            "payload": message.payload,
            "attachments": attachments,
            "from": message.from_launchable,
            "urgent": message.urgent,
        }))
    }

    fn purge(&self, message: &OutboundMessage) -> Result<(), EngineError> {
        self.shared.store.with_tx(|tx| tx.delete_outbound(&message.id))?;
        if !message.attachments.is_empty() {
            let _ = self.shared.blobs.remove_document(GLOBAL_SOLUTION, &message.id);
        }
        Ok(())
    }

    /// Delivery status for one client-originated message.
    pub fn status_of(&self, id: &str) -> Result<OutboundMessage, EngineError> {
        Ok(self.shared.store.with_tx(|tx| tx.outbound(id))?)
    }

    /// Delivery statuses for every retained message to a destination.
    pub fn statuses_for(&self, destination: &str) -> Result<Vec<OutboundMessage>, EngineError> {
        Ok(self.shared.store.with_tx(|tx| tx.outbound_for_destination(destination))?)
    }

    /// Delete expired server-originated messages and notify.
    pub fn sweep_expired(&self) -> Result<(), EngineError> {
        let now = self.shared.clock.unix_ms();
        let (events, purged) = self.shared.store.with_tx(|tx| {
            let expired = tx.expired_inbound(now)?;
            let mut events = Vec::new();
            let mut purged = Vec::new();
            for message in expired {
                tx.delete_inbound(&message.id)?;
                tx.delete_attachments_for_document(&message.solution, &message.id)?;
                purged.push((message.solution.clone(), message.id.clone()));
                events.push(Event::MessageExpired {
                    id: message.id,
                    message_type: message.message_type,
                    solution: message.solution,
                });
            }
            Ok((events, purged))
        })?;
        for (solution, id) in &purged {
            let _ = self.shared.blobs.remove_document(solution, id);
        }
        self.shared.bus.emit_all(events);
        Ok(())
    }

    /// Cadence for the expiry sweep: the smallest stored time-to-live,
    /// clamped to something sane.
    pub fn sweep_interval(&self) -> Duration {
        let min_ttl = self
            .shared
            .store
            .with_tx(|tx| tx.min_time_to_live())
            .ok()
            .flatten()
            .unwrap_or(60);
        Duration::from_secs(min_ttl.clamp(1, 3600))
    }

    pub fn message(&self, id: &str) -> Result<InboundMessage, EngineError> {
        Ok(self.shared.store.with_tx(|tx| tx.inbound(id))?)
    }

    /// Mark a message read and notify. Idempotent.
    pub fn mark_read(&self, id: &str) -> Result<(), EngineError> {
        let (changed, message) = self.shared.store.with_tx(|tx| {
            let changed = tx.mark_inbound_read(id)?;
            Ok((changed, tx.inbound(id)?))
        })?;
        if changed {
            self.shared.bus.emit(Event::MessageRead {
                id: message.id,
                message_type: message.message_type,
                solution: message.solution,
            });
        }
        Ok(())
    }

    pub fn delete_message(&self, id: &str) -> Result<(), EngineError> {
        let message = self.shared.store.with_tx(|tx| {
            let message = tx.inbound(id)?;
            tx.delete_inbound(id)?;
            tx.delete_attachments_for_document(&message.solution, &message.id)?;
            Ok(message)
        })?;
        let _ = self.shared.blobs.remove_document(&message.solution, &message.id);
        Ok(())
    }

    /// Stream messages of one type, oldest first, annotated with read-time
    /// relevance against the given context snapshot.
    pub fn messages_of_type(
        &self,
        solution: &str,
        message_type: &str,
        snapshot: &Value,
        mut processor: impl FnMut(InboundMessage, bool) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        let now = self.shared.clock.unix_ms();
        let mut failure: Option<EngineError> = None;
        let result = self.shared.store.with_tx(|tx| {
            tx.inbound_of_type(solution, message_type, |message| {
                if !message.is_active(now) {
                    return Ok(());
                }
                let relevant = is_relevant(&message, snapshot);
                match processor(message, relevant) {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        // carry the engine error across the storage boundary
                        failure = Some(err);
                        Err(StorageError::InvalidArgument("iteration aborted".into()))
                    }
                }
            })
        });
        match result {
            Ok(()) => Ok(()),
            Err(err) => Err(failure.unwrap_or_else(|| err.into())),
        }
    }
}

/// A message with no relevance pattern is always relevant.
pub(crate) fn is_relevant(message: &InboundMessage, snapshot: &Value) -> bool {
    message
        .relevance
        .as_ref()
        .map(|pattern| aiq_core::matches(snapshot, pattern))
        .unwrap_or(true)
}

fn blob_path(message_id: &str, name: &str) -> std::path::PathBuf {
    Path::new(GLOBAL_SOLUTION).join(message_id).join(name)
}

// -- pull-stream ingestion --

/// Apply a server-originated message record from the sync stream.
pub(crate) fn ingest_inbound(
    tx: &Tx<'_>,
    id: &str,
    solution: &str,
    revision: &str,
    fields: &Map<String, Value>,
    events: &mut Vec<Event>,
) -> Result<(), StorageError> {
    let existing = optional(tx.inbound(id))?;
    if let Some(existing) = &existing {
        if existing.revision.as_deref() == Some(revision) {
            return Ok(());
        }
    }
    let created = fields.get("created").and_then(Value::as_u64).unwrap_or(0);
    let message = InboundMessage {
        id: id.to_string(),
        message_type: fields.get("type").and_then(Value::as_str).unwrap_or_default().to_string(),
        solution: solution.to_string(),
        revision: Some(revision.to_string()),
        payload: fields.get("payload").cloned().unwrap_or(Value::Null),
        text: fields.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
        created,
        active_from: fields.get("active_from").and_then(Value::as_u64).unwrap_or(created),
        time_to_live: fields
            .get("time_to_live")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TTL_SECS),
        urgent: fields.get("urgent").and_then(Value::as_bool).unwrap_or(false),
        sound: fields.get("sound").and_then(Value::as_str).map(str::to_string),
        vibrate: fields.get("vibrate").and_then(Value::as_bool).unwrap_or(false),
        // a new revision resets the read flag
        read: false,
        relevance: fields.get("relevance").cloned(),
    };
    tx.put_inbound(&message)?;
    events.push(if existing.is_some() {
        Event::MessageUpdated {
            id: message.id,
            message_type: message.message_type,
            solution: message.solution,
        }
    } else {
        Event::MessageReceived {
            id: message.id,
            message_type: message.message_type,
            solution: message.solution,
        }
    });
    Ok(())
}

/// Apply a server-side removal of a message document.
pub(crate) fn remove_inbound(tx: &Tx<'_>, id: &str) -> Result<(), StorageError> {
    tx.delete_inbound(id)?;
    Ok(())
}

/// Apply a delivery-status record for a client-originated message.
pub(crate) fn apply_status(
    tx: &Tx<'_>,
    id: &str,
    status: &str,
    reason: Option<String>,
    response: Option<Value>,
    out: &mut AppliedBatch,
) -> Result<(), StorageError> {
    let Some(message) = optional(tx.outbound(id))? else {
        tracing::debug!(id, "status for unknown message");
        return Ok(());
    };
    let target = match status {
        "delivered" => OutboundState::Delivered,
        "failed" => OutboundState::Failed,
        other => {
            tracing::debug!(id, status = other, "unknown delivery status");
            return Ok(());
        }
    };
    if !message.state.can_transition(target) {
        tracing::debug!(id, from = %message.state, to = %target, "illegal status transition");
        return Ok(());
    }
    if message.expect_response {
        let mut updated = message.clone();
        updated.state = target;
        updated.response_body = response;
        updated.failure_reason = reason.clone();
        tx.update_outbound(&updated)?;
    } else {
        tx.delete_outbound(id)?;
        if !message.attachments.is_empty() {
            out.purged.push((GLOBAL_SOLUTION.to_string(), id.to_string()));
        }
    }
    out.events.push(match target {
        OutboundState::Delivered => Event::MessageDelivered {
            id: id.to_string(),
            destination: message.destination.clone(),
        },
        _ => Event::MessageFailed {
            id: id.to_string(),
            destination: message.destination.clone(),
            reason,
        },
    });
    Ok(())
}

struct SendMessagesOperation<H: HttpAdapter, C: Clock> {
    messaging: Arc<Messaging<H, C>>,
    destination: String,
}

#[async_trait]
impl<H: HttpAdapter, C: Clock> Operation for SendMessagesOperation<H, C> {
    fn label(&self) -> String {
        format!("comessage:{}", self.destination)
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<(), EngineError> {
        self.messaging.flush_destination(&self.destination, &cancel).await
    }
}

#[cfg(test)]
#[path = "messaging_tests.rs"]
mod tests;
