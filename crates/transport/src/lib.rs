// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! aiq-transport: the HTTP seam between the engine and the platform.
//!
//! The engine talks to [`HttpAdapter`], never to reqwest directly; tests
//! swap in the scripted fake from `test_support`.

mod auth;
mod client;
mod error;
mod request;

pub use auth::{token_request, AuthResponse, Credentials};
pub use client::{HttpAdapter, ReqwestAdapter};
pub use error::TransportError;
pub use request::{HttpRequest, HttpResponse, Method};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
