// SPDX-License-Identifier: MIT

//! Engine configuration with platform defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Tunables for one session. Construct with [`EngineConfig::new`] and chain
/// setters for overrides.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding `aiq.db`, the attachment root and `session.json`.
    pub data_dir: PathBuf,
    /// The platform token endpoint; every other URL comes from discovery.
    pub base_url: String,
    /// Default timeout attached to every mediated request.
    pub request_timeout: Duration,
    /// Server-side long-poll window for the data-sync stream; the client
    /// allows this plus the request timeout as margin.
    pub long_poll_window: Duration,
    /// Scheduler tick cadence.
    pub poll_interval: Duration,
    /// Cadence of the job that submits sync operations.
    pub sync_interval: Duration,
    /// Cadence of the batching tick that flushes non-urgent messages.
    pub message_batch_interval: Duration,
    /// Concurrent attachment downloads per session.
    pub download_parallelism: usize,
    /// Cap for the download/push retry backoff.
    pub backoff_cap: Duration,
    /// Operation queue bound.
    pub queue_bound: usize,
    /// Operations executing at once; network operations must serialize.
    pub queue_concurrency: usize,
}

impl EngineConfig {
    pub fn new(base_url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(60),
            long_poll_window: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            sync_interval: Duration::from_secs(5),
            message_batch_interval: Duration::from_secs(10),
            download_parallelism: 2,
            backoff_cap: Duration::from_secs(30),
            queue_bound: 64,
            queue_concurrency: 1,
        }
    }

    aiq_core::setters! {
        set {
            request_timeout: Duration,
            long_poll_window: Duration,
            poll_interval: Duration,
            sync_interval: Duration,
            message_batch_interval: Duration,
            download_parallelism: usize,
            backoff_cap: Duration,
            queue_bound: usize,
            queue_concurrency: usize,
        }
    }

    /// Total timeout for one long-poll pull request.
    pub fn pull_timeout(&self) -> Duration {
        self.long_poll_window + self.request_timeout
    }
}
