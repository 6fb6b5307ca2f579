// SPDX-License-Identifier: MIT

//! Document synchronization: pull-then-push reconciliation per solution.
//!
//! Within one solution a cycle is strictly pull, then push, then deferred
//! re-apply; cycles for different solutions are independent operations on
//! the queue. Transient failures back off exponentially, capped at the
//! configured limit.

pub(crate) mod pull;
pub(crate) mod push;
pub mod records;

use crate::downloader::Downloader;
use crate::error::EngineError;
use crate::queue::{Operation, OperationQueue};
use crate::shared::Shared;
use aiq_core::Clock;
use aiq_transport::HttpAdapter;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

struct Backoff {
    attempts: u32,
    not_before: Instant,
}

/// Per-session synchronizer state.
pub(crate) struct Synchronizer<H: HttpAdapter, C: Clock> {
    shared: Arc<Shared<H, C>>,
    downloader: Arc<Downloader<H, C>>,
    active: Mutex<HashSet<String>>,
    backoff: Mutex<HashMap<String, Backoff>>,
}

impl<H: HttpAdapter, C: Clock> Synchronizer<H, C> {
    pub fn new(shared: Arc<Shared<H, C>>, downloader: Arc<Downloader<H, C>>) -> Arc<Self> {
        Arc::new(Self {
            shared,
            downloader,
            active: Mutex::new(HashSet::new()),
            backoff: Mutex::new(HashMap::new()),
        })
    }

    /// Submit one sync operation per known solution. Solutions already
    /// syncing or backing off are skipped.
    pub fn schedule_all(self: &Arc<Self>, queue: &OperationQueue) {
        let solutions = match self.solutions() {
            Ok(solutions) => solutions,
            Err(err) => {
                tracing::warn!(error = %err, "cannot enumerate solutions");
                return;
            }
        };
        let now = self.shared.clock.now();
        for solution in solutions {
            if self.active.lock().contains(&solution) {
                continue;
            }
            if let Some(backoff) = self.backoff.lock().get(&solution) {
                if backoff.not_before > now {
                    continue;
                }
            }
            let op = SyncOperation { sync: Arc::clone(self), solution: solution.clone() };
            if let Err(err) = queue.submit(Box::new(op)) {
                tracing::warn!(solution, error = %err, "sync not queued");
            }
        }
    }

    /// Solutions granted to the user plus any already present locally.
    pub fn solutions(&self) -> Result<Vec<String>, EngineError> {
        let mut solutions: Vec<String> = self
            .shared
            .auth
            .user()
            .get("solutions")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        let known = self.shared.store.with_tx(|tx| tx.known_solutions())?;
        for solution in known {
            if !solutions.contains(&solution) {
                solutions.push(solution);
            }
        }
        Ok(solutions)
    }

    /// One full cycle for one solution.
    pub async fn sync_solution(
        self: &Arc<Self>,
        solution: &str,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        if !self.active.lock().insert(solution.to_string()) {
            tracing::debug!(solution, "sync already running");
            return Ok(());
        }
        let result = self.cycle(solution, cancel).await;
        self.active.lock().remove(solution);
        match &result {
            Ok(()) => {
                self.backoff.lock().remove(solution);
            }
            Err(err) if retryable(err) => self.note_failure(solution),
            Err(_) => {}
        }
        result
    }

    async fn cycle(&self, solution: &str, cancel: &CancellationToken) -> Result<(), EngineError> {
        let outcome = pull::pull(&self.shared, &self.downloader, solution, cancel).await?;
        if outcome.gone {
            tracing::warn!(solution, "server lost sync state, resetting");
            self.recover_from_gone(solution)?;
            let retried = pull::pull(&self.shared, &self.downloader, solution, cancel).await?;
            if retried.gone {
                return Err(EngineError::Gone);
            }
        }
        push::push(&self.shared, solution, cancel).await?;
        pull::apply_deferred(&self.shared, &self.downloader, solution)?;
        self.downloader.sweep(solution);
        Ok(())
    }

    /// Reset local sync state after a `gone` record: revisions null out,
    /// the cursor clears, every row survives for the refetch.
    fn recover_from_gone(&self, solution: &str) -> Result<(), EngineError> {
        self.shared.store.with_tx(|tx| {
            tx.null_revisions(solution)?;
            tx.remove_property(&pull::cursor_key(solution))
        })?;
        Ok(())
    }

    fn note_failure(&self, solution: &str) {
        let mut backoff = self.backoff.lock();
        let entry = backoff
            .entry(solution.to_string())
            .or_insert(Backoff { attempts: 0, not_before: self.shared.clock.now() });
        entry.attempts = entry.attempts.saturating_add(1);
        let delay = Duration::from_secs(1 << entry.attempts.min(6))
            .min(self.shared.config.backoff_cap);
        entry.not_before = self.shared.clock.now() + delay;
        tracing::debug!(solution, attempts = entry.attempts, ?delay, "sync backoff");
    }
}

fn retryable(err: &EngineError) -> bool {
    matches!(
        err,
        EngineError::Transport(_) | EngineError::BackendUnavailable { .. }
    )
}

struct SyncOperation<H: HttpAdapter, C: Clock> {
    sync: Arc<Synchronizer<H, C>>,
    solution: String,
}

#[async_trait]
impl<H: HttpAdapter, C: Clock> Operation for SyncOperation<H, C> {
    fn label(&self) -> String {
        format!("sync:{}", self.solution)
    }

    fn timeout(&self) -> Option<Duration> {
        // pull long-poll plus headroom for the push leg
        Some(self.sync.shared.config.pull_timeout() + self.sync.shared.config.request_timeout)
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<(), EngineError> {
        self.sync.sync_solution(&self.solution, &cancel).await
    }
}
