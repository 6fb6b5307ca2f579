// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! aiq-core: data model and shared primitives for the AIQ client sync engine

pub mod macros;

pub mod attachment;
pub mod clock;
pub mod document;
pub mod error;
pub mod event;
pub mod filter;
pub mod id;
pub mod launchable;
pub mod links;
pub mod message;

pub use attachment::{Attachment, AttachmentState};
pub use clock::{Clock, FakeClock, SystemClock};
pub use document::{sanitize_fields, Document, RejectionReason, SyncStatus, GLOBAL_SOLUTION};
pub use error::ErrorKind;
pub use event::{Event, EventKind};
pub use filter::matches;
#[cfg(any(test, feature = "test-support"))]
pub use id::SequentialIdGen;
pub use id::{IdGen, UuidIdGen};
pub use launchable::Launchable;
pub use links::{LinkDirectory, LinkRole};
pub use message::{
    AttachmentDescriptor, InboundMessage, OutboundMessage, OutboundState,
};
