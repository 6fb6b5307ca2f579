// SPDX-License-Identifier: MIT

//! Transport error type.

use aiq_core::ErrorKind;
use std::time::Duration;
use thiserror::Error;

/// Errors from the HTTP layer.
///
/// These cover transport failures only; HTTP status codes come back inside
/// [`crate::HttpResponse`] for the caller to interpret.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection fault: {0}")]
    Connection(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Connection(_)
            | TransportError::Timeout(_)
            | TransportError::Cancelled
            | TransportError::MalformedResponse(_) => ErrorKind::ConnectionFault,
            TransportError::InvalidRequest(_) => ErrorKind::InvalidArgument,
        }
    }
}
