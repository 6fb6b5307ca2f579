// SPDX-License-Identifier: MIT

//! OAuth2 password-grant authentication against the platform token endpoint.
//!
//! The response doubles as the endpoint discovery document: its `links`
//! object is the only source of URLs the client ever uses.

use crate::error::TransportError;
use crate::request::{HttpRequest, HttpResponse};
use aiq_core::LinkDirectory;
use indexmap::IndexMap;
use serde_json::Value;
use std::time::Duration;

/// Client identifier sent with every token request.
pub const CLIENT_ID: &str = "mobile";

/// What the application supplies to open a session.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub organization: String,
    /// Application-defined `x-*` keys forwarded verbatim with the grant.
    pub extra: IndexMap<String, String>,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            organization: organization.into(),
            extra: IndexMap::new(),
        }
    }
}

/// Parsed token + discovery response.
#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub access_token: String,
    pub expires_in: Option<u64>,
    pub links: LinkDirectory,
    pub user: Value,
}

/// Build the form-encoded password-grant request against `base_url`.
pub fn token_request(base_url: &str, credentials: &Credentials, timeout: Duration) -> HttpRequest {
    let mut pairs: Vec<(&str, &str)> = vec![
        ("grant_type", "password"),
        ("username", &credentials.username),
        ("password", &credentials.password),
        ("organization", &credentials.organization),
        ("client_id", CLIENT_ID),
    ];
    for (key, value) in &credentials.extra {
        pairs.push((key.as_str(), value.as_str()));
    }
    HttpRequest::post(base_url).timeout(timeout).form(&pairs)
}

impl AuthResponse {
    /// Parse a successful token response.
    pub fn parse(response: &HttpResponse) -> Result<Self, TransportError> {
        let body = response.json()?;
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::MalformedResponse("missing access_token".into()))?
            .to_string();
        let links = body
            .get("links")
            .map(LinkDirectory::from_value)
            .filter(|links| !links.is_empty())
            .ok_or_else(|| TransportError::MalformedResponse("missing links".into()))?;
        Ok(Self {
            access_token,
            expires_in: body.get("expires_in").and_then(Value::as_u64),
            links,
            user: body.get("user").cloned().unwrap_or(Value::Null),
        })
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
