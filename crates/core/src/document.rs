// SPDX-License-Identifier: MIT

//! Business documents: typed system fields plus an opaque user field bag.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Solution holding platform-wide documents (launchables, backend context).
pub const GLOBAL_SOLUTION: &str = "_global";

/// Synchronization status of a document or attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Created locally, waiting for synchronization.
    Created,
    /// Updated locally, waiting for synchronization.
    Updated,
    /// Deleted locally, waiting for synchronization.
    Deleted,
    /// In sync with the platform.
    Synchronized,
    /// Refused by the platform; see the rejection reason.
    Rejected,
}

impl SyncStatus {
    /// Whether a local change is waiting to be pushed.
    pub fn is_pending(self) -> bool {
        matches!(self, SyncStatus::Created | SyncStatus::Updated | SyncStatus::Deleted)
    }
}

crate::simple_display! {
    SyncStatus {
        Created => "created",
        Updated => "updated",
        Deleted => "deleted",
        Synchronized => "synchronized",
        Rejected => "rejected",
    }
}

/// Server-issued code explaining why a pushed change was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Reason was not specified by the platform.
    Unknown,
    /// User may not perform this action on documents of the given type.
    PermissionDenied,
    /// Document for the given identifier could not be found.
    DocumentNotFound,
    /// Document type was not recognized.
    TypeNotFound,
    /// Document type cannot be created or modified from the client.
    RestrictedType,
    /// Document identifier or attachment name already exists.
    CreateConflict,
    /// Document or attachment revision does not match.
    UpdateConflict,
    /// Attachment body is too large.
    LargeAttachment,
}

crate::simple_display! {
    RejectionReason {
        Unknown => "unknown",
        PermissionDenied => "permission denied",
        DocumentNotFound => "document not found",
        TypeNotFound => "type not found",
        RestrictedType => "restricted type",
        CreateConflict => "create conflict",
        UpdateConflict => "update conflict",
        LargeAttachment => "large attachment",
    }
}

/// A structured document scoped to one solution.
///
/// System fields are typed and never writable by application code; user
/// fields live in the opaque `fields` bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub solution: String,
    /// Opaque revision issued by the server; absent until first sync.
    pub revision: Option<String>,
    pub status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<RejectionReason>,
    /// User-defined fields. System keys are stripped on every write.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// A freshly created local document, not yet pushed.
    pub fn local(id: impl Into<String>, doc_type: impl Into<String>, solution: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            doc_type: doc_type.into(),
            solution: solution.into(),
            revision: None,
            status: SyncStatus::Created,
            rejection_reason: None,
            fields: sanitize_fields(fields),
        }
    }

    /// Merge system fields and user fields into the record the application
    /// reads back. System keys are underscore-prefixed so they can never
    /// collide with surviving user keys.
    pub fn to_record(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("_id".into(), Value::String(self.id.clone()));
        map.insert("_type".into(), Value::String(self.doc_type.clone()));
        map.insert("_solution".into(), Value::String(self.solution.clone()));
        if let Some(rev) = &self.revision {
            map.insert("_rev".into(), Value::String(rev.clone()));
        }
        map.insert("_status".into(), Value::String(self.status.to_string()));
        if let Some(reason) = self.rejection_reason {
            map.insert("_rejection_reason".into(), Value::String(reason.to_string()));
        }
        Value::Object(map)
    }
}

/// Drop user keys that collide with the system namespace.
///
/// Every system field is underscore-prefixed, so the rule is: any key
/// starting with `_` is silently dropped from application payloads.
pub fn sanitize_fields(fields: Map<String, Value>) -> Map<String, Value> {
    fields.into_iter().filter(|(k, _)| !k.starts_with('_')).collect()
}

#[cfg(test)]
#[path = "document_tests.rs"]
mod tests;
