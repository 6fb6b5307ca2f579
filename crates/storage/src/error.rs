// SPDX-License-Identifier: MIT

//! Storage error type.

use aiq_core::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the persistence adapter.
///
/// Underlying database and disk failures all surface as `Container`; they
/// are fatal to the enclosing operation but leave the session open.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("document {id} not found in solution {solution}")]
    DocumentNotFound { solution: String, id: String },

    #[error("attachment {name} not found for document {doc_id}")]
    AttachmentNotFound { doc_id: String, name: String },

    #[error("message {id} not found")]
    MessageNotFound { id: String },

    #[error("launchable {id} not found")]
    LaunchableNotFound { id: String },

    #[error("no blob at {path}")]
    BlobMissing { path: PathBuf },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("container fault: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("container fault: {0}")]
    Disk(#[from] std::io::Error),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::DocumentNotFound { .. }
            | StorageError::MessageNotFound { .. }
            | StorageError::LaunchableNotFound { .. } => ErrorKind::IdNotFound,
            StorageError::AttachmentNotFound { .. } => ErrorKind::NameNotFound,
            StorageError::BlobMissing { .. } => ErrorKind::ResourceNotFound,
            StorageError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            StorageError::Database(_) | StorageError::Disk(_) => ErrorKind::ContainerFault,
        }
    }
}
