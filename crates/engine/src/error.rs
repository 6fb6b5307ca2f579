// SPDX-License-Identifier: MIT

//! Engine error type.

use aiq_core::ErrorKind;
use aiq_storage::StorageError;
use aiq_transport::TransportError;
use thiserror::Error;

/// Errors surfaced by session and synchronization operations.
///
/// The engine itself never panics; every failure propagates as one of
/// these. Server-level rejections are document/message state, not errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The platform refused the supplied credentials.
    #[error("credentials were not accepted")]
    CredentialsError,

    /// The platform could not be reached or answered with a server error.
    #[error("backend unavailable (status {status:?})")]
    BackendUnavailable { status: Option<u16> },

    /// 401 survived the silent re-authentication; the session is closing.
    #[error("unauthorized")]
    Unauthorized,

    /// The server lost this client's synchronization state.
    #[error("synchronization state gone")]
    Gone,

    /// A required link is missing from the discovery response.
    #[error("no link for role '{0}'")]
    LinkMissing(&'static str),

    /// Lookup by name (context values) found nothing.
    #[error("nothing named '{0}'")]
    NameNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Another session is already open in this process or data directory.
    #[error("a session is already open")]
    SessionAlreadyOpen,

    /// No resumable session state on disk.
    #[error("no session to resume")]
    NothingToResume,

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Storage(err) => err.kind(),
            EngineError::Transport(err) => err.kind(),
            EngineError::CredentialsError | EngineError::Unauthorized => ErrorKind::Unauthorized,
            EngineError::BackendUnavailable { .. } | EngineError::Cancelled => {
                ErrorKind::ConnectionFault
            }
            EngineError::Gone => ErrorKind::Gone,
            EngineError::LinkMissing(_) | EngineError::NameNotFound(_) => ErrorKind::NameNotFound,
            EngineError::InvalidArgument(_)
            | EngineError::SessionAlreadyOpen
            | EngineError::NothingToResume => ErrorKind::InvalidArgument,
        }
    }
}
