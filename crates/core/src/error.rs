// SPDX-License-Identifier: MIT

//! Flat, integer-coded error taxonomy shared by every layer.
//!
//! Per-crate error enums (`StorageError`, `TransportError`, `EngineError`)
//! each expose `kind()` mapping onto this taxonomy, so callers can branch on
//! a stable code without matching crate-specific variants. Server-level
//! rejections are document/message *state*, never errors.

use serde::{Deserialize, Serialize};

/// The kinds of failure the client API surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Lookup by identifier found nothing.
    IdNotFound,
    /// Lookup by name (attachments, links, context values) found nothing.
    NameNotFound,
    /// An attachment blob is missing from local storage.
    ResourceNotFound,
    /// Caller passed null or ill-typed input; a caller bug.
    InvalidArgument,
    /// The platform ended the user's session; 401 survived the silent retry.
    Unauthorized,
    /// The server lost this client's sync state; engine resets and retries.
    Gone,
    /// Disk or database failure; fatal to the enclosing operation.
    ContainerFault,
    /// Transport failure; retried with backoff.
    ConnectionFault,
}

impl ErrorKind {
    /// Stable integer code, part of the public API contract.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::IdNotFound => 1,
            ErrorKind::NameNotFound => 2,
            ErrorKind::ResourceNotFound => 3,
            ErrorKind::InvalidArgument => 4,
            ErrorKind::Unauthorized => 5,
            ErrorKind::Gone => 6,
            ErrorKind::ContainerFault => 7,
            ErrorKind::ConnectionFault => 8,
        }
    }
}

crate::simple_display! {
    ErrorKind {
        IdNotFound => "id not found",
        NameNotFound => "name not found",
        ResourceNotFound => "resource not found",
        InvalidArgument => "invalid argument",
        Unauthorized => "unauthorized",
        Gone => "gone",
        ContainerFault => "container fault",
        ConnectionFault => "connection fault",
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
