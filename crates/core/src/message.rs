// SPDX-License-Identifier: MIT

//! Client-originated and server-originated messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Delivery state of a client-originated message.
///
/// Lifecycle: `Queued → {Accepted → {Delivered | Failed} | Rejected}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundState {
    /// Persisted locally, not yet posted to the platform.
    Queued,
    /// Accepted by the platform, delivery pending.
    Accepted,
    /// Refused locally by the platform (4xx on submission).
    Rejected,
    /// Confirmed delivered to the destination.
    Delivered,
    /// Accepted but delivery failed.
    Failed,
}

impl OutboundState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, OutboundState::Rejected | OutboundState::Delivered | OutboundState::Failed)
    }

    /// The single transition table for the delivery state machine.
    pub fn can_transition(self, next: OutboundState) -> bool {
        matches!(
            (self, next),
            (OutboundState::Queued, OutboundState::Accepted)
                | (OutboundState::Queued, OutboundState::Rejected)
                | (OutboundState::Accepted, OutboundState::Delivered)
                | (OutboundState::Accepted, OutboundState::Failed)
        )
    }
}

crate::simple_display! {
    OutboundState {
        Queued => "queued",
        Accepted => "accepted",
        Rejected => "rejected",
        Delivered => "delivered",
        Failed => "failed",
    }
}

/// Descriptor for a body attached to an outbound message.
///
/// The bytes live in the blob store keyed by the message id; the descriptor
/// is what travels in the submission payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub name: String,
    pub content_type: String,
    pub length: u64,
}

/// A message sent from this client to a server-side destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Client-generated UUID.
    pub id: String,
    pub destination: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentDescriptor>,
    /// Launchable the message originates from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_launchable: Option<String>,
    pub urgent: bool,
    /// When set, terminal states persist for application inspection;
    /// otherwise the row is purged once the platform accepts it.
    pub expect_response: bool,
    pub state: OutboundState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<Value>,
    /// Reason reported with a `failed` delivery status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Unix-milli creation timestamp.
    pub created_at: u64,
}

/// A message pushed from the platform to this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub solution: String,
    pub revision: Option<String>,
    pub payload: Value,
    #[serde(default)]
    pub text: String,
    /// Unix-milli creation timestamp issued by the server.
    pub created: u64,
    /// Start of the visibility window, unix-millis.
    pub active_from: u64,
    /// Visibility window length in seconds.
    pub time_to_live: u64,
    #[serde(default)]
    pub urgent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(default)]
    pub vibrate: bool,
    #[serde(default)]
    pub read: bool,
    /// Optional relevance pattern matched against the context snapshot at
    /// read time. Never persisted as a computed value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<Value>,
}

impl InboundMessage {
    /// Unix-milli instant the visibility window closes.
    pub fn expires_at_ms(&self) -> u64 {
        self.active_from.saturating_add(self.time_to_live.saturating_mul(1000))
    }

    /// A message is visible iff `active_from <= now <= active_from + ttl`.
    pub fn is_active(&self, now_ms: u64) -> bool {
        self.active_from <= now_ms && now_ms <= self.expires_at_ms()
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
