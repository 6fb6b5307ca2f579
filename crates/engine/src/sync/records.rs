// SPDX-License-Identifier: MIT

//! Change records on the data-sync stream.
//!
//! The server answers a pull with newline-delimited JSON, one record per
//! line, tagged by `op`. Unknown operations are skipped so old clients
//! survive new record types.

use aiq_core::RejectionReason;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attachment metadata carried inline with document records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub name: String,
    pub revision: String,
    pub content_type: String,
    pub resource_url: String,
    #[serde(default)]
    pub length: u64,
}

/// One record on the pull stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ChangeRecord {
    Create {
        solution: String,
        #[serde(rename = "type")]
        doc_type: String,
        id: String,
        revision: String,
        #[serde(default)]
        fields: Map<String, Value>,
        #[serde(default)]
        attachments: Vec<AttachmentRecord>,
    },
    Update {
        solution: String,
        #[serde(rename = "type")]
        doc_type: String,
        id: String,
        revision: String,
        #[serde(default)]
        fields: Map<String, Value>,
        #[serde(default)]
        attachments: Vec<AttachmentRecord>,
    },
    Delete {
        solution: String,
        #[serde(rename = "type")]
        doc_type: String,
        id: String,
    },
    /// Server response to a previously pushed local change.
    Rejected {
        solution: String,
        #[serde(rename = "type")]
        doc_type: String,
        id: String,
        reason: String,
    },
    Attachment {
        solution: String,
        #[serde(rename = "type")]
        doc_type: String,
        doc_id: String,
        name: String,
        revision: String,
        content_type: String,
        resource_url: String,
        #[serde(default)]
        length: u64,
    },
    /// Delivery-status update for a client-originated message.
    Status {
        id: String,
        status: String,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        response: Option<Value>,
    },
    /// The server has forgotten this client's sync state.
    Gone {},
}

impl ChangeRecord {
    /// The document this record touches, when it touches one.
    pub fn doc_key(&self) -> Option<(&str, &str)> {
        match self {
            ChangeRecord::Create { solution, id, .. }
            | ChangeRecord::Update { solution, id, .. }
            | ChangeRecord::Delete { solution, id, .. }
            | ChangeRecord::Rejected { solution, id, .. } => Some((solution, id)),
            ChangeRecord::Attachment { solution, doc_id, .. } => Some((solution, doc_id)),
            ChangeRecord::Status { .. } | ChangeRecord::Gone {} => None,
        }
    }
}

/// Parse a pull response body. Blank lines and unknown operations are
/// skipped with a warning.
pub fn parse_stream(body: &[u8]) -> Vec<ChangeRecord> {
    let text = String::from_utf8_lossy(body);
    let mut records = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ChangeRecord>(line) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(error = %err, line, "skipping unparseable change record");
            }
        }
    }
    records
}

/// Map a server rejection code to the typed reason.
pub fn reason_from_wire(reason: &str) -> RejectionReason {
    match reason {
        "permission_denied" => RejectionReason::PermissionDenied,
        "document_not_found" => RejectionReason::DocumentNotFound,
        "type_not_found" => RejectionReason::TypeNotFound,
        "restricted_type" => RejectionReason::RestrictedType,
        "create_conflict" => RejectionReason::CreateConflict,
        "update_conflict" => RejectionReason::UpdateConflict,
        "large_attachment" => RejectionReason::LargeAttachment,
        other => {
            if other != "unknown" {
                tracing::debug!(reason = other, "unrecognized rejection reason");
            }
            RejectionReason::Unknown
        }
    }
}

#[cfg(test)]
#[path = "records_tests.rs"]
mod tests;
