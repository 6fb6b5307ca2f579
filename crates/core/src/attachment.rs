// SPDX-License-Identifier: MIT

//! Attachments: sync metadata plus local blob availability.

use crate::document::{RejectionReason, SyncStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Local availability of the blob bytes, independent of sync status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentState {
    /// Blob is stored locally and ready to read.
    Available,
    /// Blob is missing locally; will be retried on the next tick.
    Unavailable,
    /// Blob is permanently missing; terminal until a new revision arrives.
    Failed,
}

crate::simple_display! {
    AttachmentState {
        Available => "available",
        Unavailable => "unavailable",
        Failed => "failed",
    }
}

/// An attachment row belonging to one document.
///
/// `state == Available` iff a local blob exists at `file_path` and its size
/// matches the server-advertised `length`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub solution: String,
    pub doc_id: String,
    /// Type of the owning document, denormalized for notification payloads.
    pub doc_type: String,
    /// Unique within the owning document.
    pub name: String,
    pub content_type: String,
    pub revision: Option<String>,
    pub status: SyncStatus,
    pub state: AttachmentState,
    /// Server path the blob downloads from.
    pub resource_url: Option<String>,
    /// Blob location relative to the attachment root.
    pub file_path: Option<PathBuf>,
    /// Server-advertised byte length.
    pub length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<RejectionReason>,
}

impl Attachment {
    /// Relative blob path: `<solution>/<doc_id>/<name>`.
    ///
    /// Moving an attachment root between sessions only renames the root.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.solution).join(&self.doc_id).join(&self.name)
    }
}

#[cfg(test)]
#[path = "attachment_tests.rs"]
mod tests;
