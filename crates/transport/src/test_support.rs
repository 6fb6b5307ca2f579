// SPDX-License-Identifier: MIT

//! Scripted HTTP adapter for engine tests.
//!
//! Responses are queued per URL; each request pops the next response for
//! its URL (falling back to a catch-all default). Every request is
//! recorded for assertions.

use crate::client::HttpAdapter;
use crate::error::TransportError;
use crate::request::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct FakeResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FakeResponse {
    pub fn status(status: u16) -> Self {
        Self { status, headers: Vec::new(), body: Vec::new() }
    }

    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self { status, headers: Vec::new(), body: body.to_string().into_bytes() }
    }

    pub fn body(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: Vec::new(), body: body.into() }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Default)]
struct FakeState {
    queues: HashMap<String, VecDeque<FakeResponse>>,
    fallback: Option<FakeResponse>,
    requests: Vec<HttpRequest>,
}

/// Scripted [`HttpAdapter`].
#[derive(Clone, Default)]
pub struct FakeHttpAdapter {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHttpAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next response for requests whose URL starts with `url`.
    pub fn enqueue(&self, url: impl Into<String>, response: FakeResponse) {
        self.state.lock().queues.entry(url.into()).or_default().push_back(response);
    }

    /// Respond with `response` whenever no queued response matches.
    pub fn set_fallback(&self, response: FakeResponse) {
        self.state.lock().fallback = Some(response);
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().requests.clone()
    }

    /// Requests whose URL starts with `url`.
    pub fn requests_to(&self, url: &str) -> Vec<HttpRequest> {
        self.requests().into_iter().filter(|r| r.url.starts_with(url)).collect()
    }

    fn next_response(&self, request: &HttpRequest) -> Result<FakeResponse, TransportError> {
        let mut state = self.state.lock();
        state.requests.push(request.clone());
        let matched = state
            .queues
            .iter_mut()
            .filter(|(url, queue)| request.url.starts_with(url.as_str()) && !queue.is_empty())
            // longest prefix wins so specific scripts beat catch-alls
            .max_by_key(|(url, _)| url.len())
            .and_then(|(_, queue)| queue.pop_front());
        matched
            .or_else(|| state.fallback.clone())
            .ok_or_else(|| TransportError::Connection(format!("no scripted response for {}", request.url)))
    }
}

#[async_trait]
impl HttpAdapter for FakeHttpAdapter {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let response = self.next_response(&request)?;
        Ok(HttpResponse { status: response.status, headers: response.headers, body: response.body })
    }

    async fn download(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
        sink: &mut (dyn for<'a> FnMut(&'a [u8]) -> Result<(), TransportError> + Send),
    ) -> Result<(u16, u64), TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let response = self.next_response(&request)?;
        if !(200..300).contains(&response.status) {
            return Ok((response.status, 0));
        }
        // stream in small chunks so progress paths get exercised
        let mut streamed = 0u64;
        for chunk in response.body.chunks(1024) {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            sink(chunk)?;
            streamed += chunk.len() as u64;
        }
        Ok((response.status, streamed))
    }
}
