// SPDX-License-Identifier: MIT

//! Bounded FIFO of cancellable operations.
//!
//! Operations dequeue in submission order; a concurrency permit gates how
//! many run at once (one by default, since network operations must
//! serialize). Every operation receives a cancellation token it must check
//! at each suspension point, and a timeout enforced around its `run`.

use crate::error::EngineError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;

/// A cancellable unit of work.
#[async_trait]
pub trait Operation: Send + 'static {
    /// Short name for logs.
    fn label(&self) -> String;

    /// Per-operation timeout; the queue default applies when `None`.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Execute. Implementations must observe `cancel` at every suspension
    /// point and release any database transaction before returning, even
    /// when cancelled.
    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<(), EngineError>;
}

struct Submission {
    op: Box<dyn Operation>,
    cancel: CancellationToken,
    done: Option<oneshot::Sender<Result<(), EngineError>>>,
}

/// Handle to the queue. Cheap to clone.
#[derive(Clone)]
pub struct OperationQueue {
    tx: mpsc::Sender<Submission>,
    root: Arc<Mutex<CancellationToken>>,
}

impl OperationQueue {
    /// Create the queue and spawn its dispatcher.
    ///
    /// The dispatcher exits when `shutdown` fires or every handle drops.
    pub fn start(
        bound: usize,
        concurrency: usize,
        default_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Submission>(bound.max(1));
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        tokio::spawn(async move {
            loop {
                let submission = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = rx.recv() => match received {
                        Some(submission) => submission,
                        None => break,
                    },
                };
                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                tokio::spawn(async move {
                    run_one(submission, default_timeout).await;
                    drop(permit);
                });
            }
            tracing::debug!("operation queue stopped");
        });
        Self { tx, root: Arc::new(Mutex::new(CancellationToken::new())) }
    }

    /// Enqueue an operation. Fails when the queue is full.
    pub fn submit(&self, op: Box<dyn Operation>) -> Result<(), EngineError> {
        self.submit_inner(op, None)
    }

    /// Enqueue and receive the operation's result on completion.
    pub fn submit_watched(
        &self,
        op: Box<dyn Operation>,
    ) -> Result<oneshot::Receiver<Result<(), EngineError>>, EngineError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.submit_inner(op, Some(done_tx))?;
        Ok(done_rx)
    }

    fn submit_inner(
        &self,
        op: Box<dyn Operation>,
        done: Option<oneshot::Sender<Result<(), EngineError>>>,
    ) -> Result<(), EngineError> {
        let cancel = self.root.lock().child_token();
        self.tx
            .try_send(Submission { op, cancel, done })
            .map_err(|_| EngineError::InvalidArgument("operation queue full".into()))
    }

    /// Cancel every queued and in-flight operation.
    ///
    /// Operations submitted afterwards run normally.
    pub fn cancel_all(&self) {
        let fresh = CancellationToken::new();
        let old = std::mem::replace(&mut *self.root.lock(), fresh);
        old.cancel();
    }
}

async fn run_one(submission: Submission, default_timeout: Duration) {
    let Submission { op, cancel, done } = submission;
    let label = op.label();
    let result = if cancel.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        let timeout = op.timeout().unwrap_or(default_timeout);
        match tokio::time::timeout(timeout, op.run(cancel.clone())).await {
            Ok(result) => result,
            Err(_) => {
                // the operation overran; make sure its request unwinds
                cancel.cancel();
                tracing::warn!(op = %label, ?timeout, "operation timed out");
                Err(EngineError::Cancelled)
            }
        }
    };
    match &result {
        Ok(()) => tracing::debug!(op = %label, "operation finished"),
        Err(EngineError::Cancelled) => tracing::debug!(op = %label, "operation cancelled"),
        Err(err) => tracing::warn!(op = %label, error = %err, "operation failed"),
    }
    if let Some(done) = done {
        let _ = done.send(result);
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
