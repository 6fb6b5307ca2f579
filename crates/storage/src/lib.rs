// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! aiq-storage: the persistence adapter.
//!
//! One SQLite file (`aiq.db`) holds documents, attachments, queued messages,
//! launchables and session properties; attachment bodies live in a
//! file-backed blob store next to it. Every multi-row write runs in one
//! transaction and readers see a consistent snapshot.

mod blobs;
mod error;
mod schema;
mod store;

pub use blobs::{BlobStore, BlobWriter};
pub use error::StorageError;
pub use store::{DataStore, Tx};

/// File name of the relational store inside a session's data directory.
pub const DB_FILE: &str = "aiq.db";
