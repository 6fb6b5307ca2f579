// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! aiq-engine: the client half of the AIQ synchronization platform.
//!
//! A [`Session`] gates everything: opening one authenticates against the
//! platform, starts the scheduler and operation queue, and exposes the
//! document, attachment, messaging, context and direct-call surfaces.
//! Remote changes arrive through the pull/push synchronizer and fan out as
//! [`aiq_core::Event`]s on the notification bus.

mod auth;
mod bus;
mod config;
mod context;
mod direct;
mod downloader;
mod error;
mod launchables;
mod messaging;
mod queue;
mod scheduler;
mod session;
mod shared;
mod sync;
pub mod telemetry;
#[cfg(test)]
mod test_util;

pub use auth::AuthHandle;
pub use bus::NotificationBus;
pub use config::EngineConfig;
pub use context::{ContextAggregator, ContextProvider};
pub use direct::{DirectCallError, DirectCallRequest, DirectCallResponse};
pub use error::EngineError;
pub use messaging::SendMessageParams;
pub use queue::{Operation, OperationQueue};
pub use scheduler::Scheduler;
pub use session::{Session, SessionFile, UserInfo, SESSION_FILE};
pub use sync::records::ChangeRecord;
