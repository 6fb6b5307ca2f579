// SPDX-License-Identifier: MIT

//! Authenticated request mediation.
//!
//! Every outgoing exchange goes through [`AuthHandle`]: it attaches the
//! bearer token and default timeout, silently re-authenticates once on a
//! 401 using the credentials held in memory, and closes the session when
//! the retry fails too.

use crate::bus::NotificationBus;
use crate::error::EngineError;
use crate::session::SessionFile;
use aiq_core::{Event, LinkDirectory, LinkRole};
use aiq_transport::{
    token_request, AuthResponse, Credentials, HttpAdapter, HttpRequest, HttpResponse,
    TransportError,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct AuthState {
    token: Option<String>,
    links: LinkDirectory,
    user: Value,
    /// Kept in memory only; never written to disk. A resumed session has
    /// none, so its first hard 401 closes it.
    credentials: Option<Credentials>,
}

/// Session authentication state and request mediator. Cheap to clone.
#[derive(Clone)]
pub struct AuthHandle<H: HttpAdapter> {
    http: H,
    base_url: String,
    timeout: Duration,
    bus: NotificationBus,
    cancel: CancellationToken,
    session_file: PathBuf,
    state: Arc<Mutex<AuthState>>,
}

impl<H: HttpAdapter> AuthHandle<H> {
    pub(crate) fn new(
        http: H,
        base_url: String,
        timeout: Duration,
        bus: NotificationBus,
        cancel: CancellationToken,
        session_file: PathBuf,
    ) -> Self {
        Self {
            http,
            base_url,
            timeout,
            bus,
            cancel,
            session_file,
            state: Arc::new(Mutex::new(AuthState {
                token: None,
                links: LinkDirectory::default(),
                user: Value::Null,
                credentials: None,
            })),
        }
    }

    /// Adopt a fresh token response.
    pub(crate) fn install(&self, auth: AuthResponse, credentials: Option<Credentials>) {
        let mut state = self.state.lock();
        state.token = Some(auth.access_token);
        state.links = auth.links;
        state.user = auth.user;
        if credentials.is_some() {
            state.credentials = credentials;
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().token.is_some()
    }

    pub fn token(&self) -> Option<String> {
        self.state.lock().token.clone()
    }

    pub fn links(&self) -> LinkDirectory {
        self.state.lock().links.clone()
    }

    pub fn user(&self) -> Value {
        self.state.lock().user.clone()
    }

    /// Resolve a discovery link or fail with `NameNotFound`.
    pub fn link(&self, role: LinkRole) -> Result<String, EngineError> {
        self.state
            .lock()
            .links
            .url(role)
            .map(str::to_string)
            .ok_or(EngineError::LinkMissing(role.as_str()))
    }

    /// Perform an exchange with bearer auth and the 401-retry contract.
    pub async fn send_authorized(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, EngineError> {
        let token = self.token().ok_or(EngineError::Unauthorized)?;
        let request = ensure_timeout(request, self.timeout);
        let response =
            self.http.send(request.clone().bearer(&token), cancel).await.map_err(EngineError::from)?;
        if response.status != 401 {
            return Ok(response);
        }
        let token = self.reauthenticate(cancel).await?;
        let retried = self.http.send(request.bearer(&token), cancel).await.map_err(EngineError::from)?;
        if retried.status == 401 {
            self.handle_unauthorized();
            return Err(EngineError::Unauthorized);
        }
        Ok(retried)
    }

    /// Streaming variant of [`Self::send_authorized`].
    pub async fn download_authorized(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
        sink: &mut (dyn FnMut(&[u8]) -> Result<(), TransportError> + Send),
    ) -> Result<(u16, u64), EngineError> {
        let token = self.token().ok_or(EngineError::Unauthorized)?;
        let request = ensure_timeout(request, self.timeout);
        let (status, streamed) = self
            .http
            .download(request.clone().bearer(&token), cancel, sink)
            .await
            .map_err(EngineError::from)?;
        if status != 401 {
            return Ok((status, streamed));
        }
        let token = self.reauthenticate(cancel).await?;
        let (status, streamed) =
            self.http.download(request.bearer(&token), cancel, sink).await.map_err(EngineError::from)?;
        if status == 401 {
            self.handle_unauthorized();
            return Err(EngineError::Unauthorized);
        }
        Ok((status, streamed))
    }

    /// One silent re-authentication attempt with the stored credentials.
    async fn reauthenticate(&self, cancel: &CancellationToken) -> Result<String, EngineError> {
        let Some(credentials) = self.state.lock().credentials.clone() else {
            self.handle_unauthorized();
            return Err(EngineError::Unauthorized);
        };
        tracing::info!("access token expired, re-authenticating");
        let request = token_request(&self.base_url, &credentials, self.timeout);
        let response = self.http.send(request, cancel).await.map_err(EngineError::from)?;
        if response.status == 401 || response.status == 403 {
            self.handle_unauthorized();
            return Err(EngineError::Unauthorized);
        }
        if !response.is_success() {
            // the platform is unwell, not the token; leave the session open
            return Err(EngineError::BackendUnavailable { status: Some(response.status) });
        }
        let auth = AuthResponse::parse(&response)?;
        let token = auth.access_token.clone();
        self.install(auth, None);
        SessionFile::update_token(&self.session_file, Some(&token));
        Ok(token)
    }

    /// The platform ended the session: purge the token, tell observers,
    /// stop all background work.
    pub(crate) fn handle_unauthorized(&self) {
        tracing::warn!("session unauthorized, closing");
        self.clear();
        SessionFile::update_token(&self.session_file, None);
        self.bus.emit(Event::SessionClosed {});
        self.cancel.cancel();
    }

    /// Drop token and credentials from memory.
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        state.token = None;
        state.credentials = None;
    }

    #[cfg(test)]
    pub(crate) fn clear_credentials_for_test(&self) {
        self.state.lock().credentials = None;
    }
}

fn ensure_timeout(request: HttpRequest, default: Duration) -> HttpRequest {
    if request.timeout.is_some() {
        request
    } else {
        request.timeout(default)
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
