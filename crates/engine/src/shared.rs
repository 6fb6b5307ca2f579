// SPDX-License-Identifier: MIT

//! State shared by every component of one session.

use crate::auth::AuthHandle;
use crate::bus::NotificationBus;
use crate::config::EngineConfig;
use aiq_core::{Clock, IdGen};
use aiq_storage::{BlobStore, DataStore};
use aiq_transport::HttpAdapter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Treat not-found lookups as `None`, propagating real failures.
pub(crate) fn optional<T>(
    result: Result<T, aiq_storage::StorageError>,
) -> Result<Option<T>, aiq_storage::StorageError> {
    use aiq_core::ErrorKind;
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if matches!(err.kind(), ErrorKind::IdNotFound | ErrorKind::NameNotFound) => {
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

pub(crate) struct Shared<H: HttpAdapter, C: Clock> {
    pub config: EngineConfig,
    pub clock: C,
    pub store: DataStore,
    pub blobs: BlobStore,
    pub bus: NotificationBus,
    pub auth: AuthHandle<H>,
    pub ids: Arc<dyn IdGen>,
    /// Session-wide cancellation: fires on close and on hard 401.
    pub cancel: CancellationToken,
}
