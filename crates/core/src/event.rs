// SPDX-License-Identifier: MIT

//! Lifecycle events fanned out to application observers.
//!
//! Serializes with `{"type": "entity:verb", ...fields}` format. Events for a
//! given entity id are emitted in the order the engine committed the
//! underlying state changes; no cross-entity ordering is guaranteed.

use crate::document::RejectionReason;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- documents --
    #[serde(rename = "document:created")]
    DocumentCreated { id: String, doc_type: String, solution: String },

    #[serde(rename = "document:updated")]
    DocumentUpdated { id: String, doc_type: String, solution: String },

    #[serde(rename = "document:deleted")]
    DocumentDeleted { id: String, doc_type: String, solution: String },

    #[serde(rename = "document:synchronized")]
    DocumentSynchronized { id: String, doc_type: String, solution: String },

    #[serde(rename = "document:rejected")]
    DocumentRejected {
        id: String,
        doc_type: String,
        solution: String,
        reason: RejectionReason,
    },

    // -- attachments --
    #[serde(rename = "attachment:created")]
    AttachmentCreated { name: String, doc_id: String, doc_type: String, solution: String },

    #[serde(rename = "attachment:updated")]
    AttachmentUpdated { name: String, doc_id: String, doc_type: String, solution: String },

    #[serde(rename = "attachment:deleted")]
    AttachmentDeleted { name: String, doc_id: String, doc_type: String, solution: String },

    #[serde(rename = "attachment:synchronized")]
    AttachmentSynchronized { name: String, doc_id: String, doc_type: String, solution: String },

    #[serde(rename = "attachment:rejected")]
    AttachmentRejected {
        name: String,
        doc_id: String,
        doc_type: String,
        solution: String,
        reason: RejectionReason,
    },

    /// Download progress, throttled by the downloader.
    #[serde(rename = "attachment:progress")]
    AttachmentProgress {
        name: String,
        doc_id: String,
        doc_type: String,
        solution: String,
        downloaded: u64,
        total: u64,
    },

    #[serde(rename = "attachment:available")]
    AttachmentAvailable { name: String, doc_id: String, doc_type: String, solution: String },

    #[serde(rename = "attachment:unavailable")]
    AttachmentUnavailable { name: String, doc_id: String, doc_type: String, solution: String },

    #[serde(rename = "attachment:failed")]
    AttachmentFailed { name: String, doc_id: String, doc_type: String, solution: String },

    // -- server-originated messages --
    #[serde(rename = "message:received")]
    MessageReceived { id: String, message_type: String, solution: String },

    #[serde(rename = "message:updated")]
    MessageUpdated { id: String, message_type: String, solution: String },

    #[serde(rename = "message:expired")]
    MessageExpired { id: String, message_type: String, solution: String },

    #[serde(rename = "message:read")]
    MessageRead { id: String, message_type: String, solution: String },

    // -- client-originated messages --
    #[serde(rename = "comessage:queued")]
    MessageQueued { id: String, destination: String },

    #[serde(rename = "comessage:accepted")]
    MessageAccepted { id: String, destination: String },

    #[serde(rename = "comessage:rejected")]
    MessageRejected {
        id: String,
        destination: String,
        reason: RejectionReason,
    },

    #[serde(rename = "comessage:delivered")]
    MessageDelivered { id: String, destination: String },

    #[serde(rename = "comessage:failed")]
    MessageFailed {
        id: String,
        destination: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    // -- session --
    #[serde(rename = "session:opened")]
    SessionOpened { username: String },

    #[serde(rename = "session:closed")]
    SessionClosed {},

    // -- launchables --
    #[serde(rename = "launchable:installed")]
    LaunchableInstalled { id: String, name: String, solution: String },

    #[serde(rename = "launchable:uninstalled")]
    LaunchableUninstalled { id: String, name: String, solution: String },

    #[serde(rename = "launchable:updated")]
    LaunchableUpdated { id: String, name: String, solution: String },

    #[serde(rename = "launchable:progress")]
    LaunchableProgress {
        id: String,
        name: String,
        solution: String,
        downloaded: u64,
        total: u64,
    },

    #[serde(rename = "launchable:failed")]
    LaunchableFailed { id: String, name: String, solution: String },

    // -- context --
    #[serde(rename = "context:changed")]
    ContextChanged { name: String, value: Value },
}

/// Discriminant used by observers to subscribe by event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DocumentCreated,
    DocumentUpdated,
    DocumentDeleted,
    DocumentSynchronized,
    DocumentRejected,
    AttachmentCreated,
    AttachmentUpdated,
    AttachmentDeleted,
    AttachmentSynchronized,
    AttachmentRejected,
    AttachmentProgress,
    AttachmentAvailable,
    AttachmentUnavailable,
    AttachmentFailed,
    MessageReceived,
    MessageUpdated,
    MessageExpired,
    MessageRead,
    MessageQueued,
    MessageAccepted,
    MessageRejected,
    MessageDelivered,
    MessageFailed,
    SessionOpened,
    SessionClosed,
    LaunchableInstalled,
    LaunchableUninstalled,
    LaunchableUpdated,
    LaunchableProgress,
    LaunchableFailed,
    ContextChanged,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::DocumentCreated { .. } => EventKind::DocumentCreated,
            Event::DocumentUpdated { .. } => EventKind::DocumentUpdated,
            Event::DocumentDeleted { .. } => EventKind::DocumentDeleted,
            Event::DocumentSynchronized { .. } => EventKind::DocumentSynchronized,
            Event::DocumentRejected { .. } => EventKind::DocumentRejected,
            Event::AttachmentCreated { .. } => EventKind::AttachmentCreated,
            Event::AttachmentUpdated { .. } => EventKind::AttachmentUpdated,
            Event::AttachmentDeleted { .. } => EventKind::AttachmentDeleted,
            Event::AttachmentSynchronized { .. } => EventKind::AttachmentSynchronized,
            Event::AttachmentRejected { .. } => EventKind::AttachmentRejected,
            Event::AttachmentProgress { .. } => EventKind::AttachmentProgress,
            Event::AttachmentAvailable { .. } => EventKind::AttachmentAvailable,
            Event::AttachmentUnavailable { .. } => EventKind::AttachmentUnavailable,
            Event::AttachmentFailed { .. } => EventKind::AttachmentFailed,
            Event::MessageReceived { .. } => EventKind::MessageReceived,
            Event::MessageUpdated { .. } => EventKind::MessageUpdated,
            Event::MessageExpired { .. } => EventKind::MessageExpired,
            Event::MessageRead { .. } => EventKind::MessageRead,
            Event::MessageQueued { .. } => EventKind::MessageQueued,
            Event::MessageAccepted { .. } => EventKind::MessageAccepted,
            Event::MessageRejected { .. } => EventKind::MessageRejected,
            Event::MessageDelivered { .. } => EventKind::MessageDelivered,
            Event::MessageFailed { .. } => EventKind::MessageFailed,
            Event::SessionOpened { .. } => EventKind::SessionOpened,
            Event::SessionClosed { .. } => EventKind::SessionClosed,
            Event::LaunchableInstalled { .. } => EventKind::LaunchableInstalled,
            Event::LaunchableUninstalled { .. } => EventKind::LaunchableUninstalled,
            Event::LaunchableUpdated { .. } => EventKind::LaunchableUpdated,
            Event::LaunchableProgress { .. } => EventKind::LaunchableProgress,
            Event::LaunchableFailed { .. } => EventKind::LaunchableFailed,
            Event::ContextChanged { .. } => EventKind::ContextChanged,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
