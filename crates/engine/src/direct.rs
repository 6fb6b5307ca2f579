// SPDX-License-Identifier: MIT

//! Direct calls: an authenticated pass-through proxy.
//!
//! The application supplies method, path, parameters, headers and body;
//! the engine prefixes the `direct` link, attaches auth and the default
//! timeout, and hands back `(status, headers, body)` untouched. Transport
//! failures come back as a flat error object.

use crate::error::EngineError;
use crate::shared::Shared;
use aiq_core::{Clock, LinkRole};
use aiq_transport::{HttpAdapter, HttpRequest, Method};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Error domain reported for direct-call failures.
pub const ERROR_DOMAIN: &str = "com.appearnetworks.aiq";

#[derive(Debug, Clone)]
pub struct DirectCallRequest {
    pub method: String,
    /// Path below the `direct` endpoint.
    pub path: String,
    /// Query parameters, appended percent-encoded.
    pub parameters: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<String>,
    pub timeout: Option<Duration>,
}

impl DirectCallRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            parameters: Vec::new(),
            headers: Vec::new(),
            body: None,
            content_type: None,
            timeout: None,
        }
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone)]
pub struct DirectCallResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Flat error object delivered when a direct call cannot complete.
#[derive(Debug)]
pub struct DirectCallError {
    pub domain: String,
    pub code: i32,
    pub status_code: Option<u16>,
}

impl DirectCallError {
    fn from_engine(err: EngineError) -> Self {
        let status_code = match &err {
            EngineError::BackendUnavailable { status } => *status,
            EngineError::Unauthorized => Some(401),
            _ => None,
        };
        Self { domain: ERROR_DOMAIN.to_string(), code: err.kind().code(), status_code }
    }
}

pub(crate) async fn direct_call<H: HttpAdapter, C: Clock>(
    shared: &Arc<Shared<H, C>>,
    call: DirectCallRequest,
    cancel: &CancellationToken,
) -> Result<DirectCallResponse, DirectCallError> {
    let method = Method::parse(&call.method)
        .map_err(|err| DirectCallError::from_engine(err.into()))?;
    let base = shared
        .auth
        .link(LinkRole::Direct)
        .map_err(DirectCallError::from_engine)?;

    let mut url = format!("{}/{}", base.trim_end_matches('/'), call.path.trim_start_matches('/'));
    if !call.parameters.is_empty() {
        let query: Vec<String> = call
            .parameters
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        url.push('?');
        url.push_str(&query.join("&"));
    }

    let mut request = HttpRequest::new(method, url);
    for (name, value) in call.headers {
        request = request.header(name, value);
    }
    request.body = call.body;
    request.content_type = call.content_type;
    if let Some(timeout) = call.timeout {
        request = request.timeout(timeout);
    }

    let response = shared
        .auth
        .send_authorized(request, cancel)
        .await
        .map_err(DirectCallError::from_engine)?;
    Ok(DirectCallResponse {
        status: response.status,
        headers: response.headers,
        body: response.body,
    })
}
