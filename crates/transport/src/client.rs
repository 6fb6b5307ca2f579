// SPDX-License-Identifier: MIT

//! The adapter trait the engine depends on, plus the reqwest implementation.

use crate::error::TransportError;
use crate::request::{HttpRequest, HttpResponse, Method};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Performs HTTP exchanges on behalf of the engine.
///
/// Implementations observe the cancellation token at every suspension
/// point; a cancelled exchange returns [`TransportError::Cancelled`]
/// without side effects.
#[async_trait]
pub trait HttpAdapter: Clone + Send + Sync + 'static {
    /// Perform one exchange, buffering the response body.
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError>;

    /// Perform a streaming GET, feeding each body chunk to `sink`.
    ///
    /// Returns the response status and, on 2xx, the total bytes streamed.
    /// Non-2xx responses return without calling `sink`.
    async fn download(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
        sink: &mut (dyn for<'a> FnMut(&'a [u8]) -> Result<(), TransportError> + Send),
    ) -> Result<(u16, u64), TransportError>;
}

/// Production adapter over a shared reqwest client.
#[derive(Clone)]
pub struct ReqwestAdapter {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl ReqwestAdapter {
    pub fn new(default_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self { client, default_timeout })
    }

    fn build(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout.unwrap_or(self.default_timeout));
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(content_type) = &request.content_type {
            builder = builder.header("Content-Type", content_type);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder
    }

    fn map_error(timeout: Duration, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else {
            TransportError::Connection(err.to_string())
        }
    }
}

fn collect_headers(response: &reqwest::Response) -> Vec<(String, String)> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

#[async_trait]
impl HttpAdapter for ReqwestAdapter {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        tracing::trace!(method = request.method.as_str(), url = %request.url, "http request");
        let builder = self.build(&request);
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = builder.send() => result.map_err(|e| Self::map_error(timeout, e))?,
        };
        let status = response.status().as_u16();
        let headers = collect_headers(&response);
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = response.bytes() => {
                result.map_err(|e| Self::map_error(timeout, e))?.to_vec()
            }
        };
        tracing::trace!(status, bytes = body.len(), url = %request.url, "http response");
        Ok(HttpResponse { status, headers, body })
    }

    async fn download(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
        sink: &mut (dyn for<'a> FnMut(&'a [u8]) -> Result<(), TransportError> + Send),
    ) -> Result<(u16, u64), TransportError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let builder = self.build(&request);
        let mut response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = builder.send() => result.map_err(|e| Self::map_error(timeout, e))?,
        };
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Ok((status, 0));
        }
        let mut streamed = 0u64;
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                result = response.chunk() => result.map_err(|e| Self::map_error(timeout, e))?,
            };
            let Some(chunk) = chunk else { break };
            streamed += chunk.len() as u64;
            sink(&chunk)?;
        }
        Ok((status, streamed))
    }
}
