// SPDX-License-Identifier: MIT

//! Best-effort attachment downloads.
//!
//! Each work unit streams one blob into a temporary file and atomically
//! renames it on success. Parallelism is bounded by a semaphore; at most
//! one download runs per `(doc_id, name)` pair, and transient failures
//! back off exponentially up to the configured cap.

use crate::launchables;
use crate::shared::Shared;
use crate::sync::pull::LAUNCHABLE_TYPE;
use aiq_core::{Attachment, AttachmentState, Clock, Event};
use aiq_transport::{HttpAdapter, HttpRequest, TransportError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Emit progress at most this often, by volume.
const PROGRESS_BYTES: u64 = 256 * 1024;
/// Emit progress at most this often, by time.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

type Key = (String, String, String);

struct Backoff {
    attempts: u32,
    not_before: Instant,
}

pub(crate) struct Downloader<H: HttpAdapter, C: Clock> {
    shared: Arc<Shared<H, C>>,
    semaphore: Arc<Semaphore>,
    in_flight: Mutex<HashSet<Key>>,
    backoff: Mutex<HashMap<Key, Backoff>>,
}

enum FetchOutcome {
    /// Blob on disk, verified against the advertised length.
    Done,
    /// 404/410: terminal until a new revision arrives.
    Missing,
    /// Anything else; retried on a later sweep.
    Transient,
}

impl<H: HttpAdapter, C: Clock> Downloader<H, C> {
    pub fn new(shared: Arc<Shared<H, C>>) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(shared.config.download_parallelism.max(1))),
            shared,
            in_flight: Mutex::new(HashSet::new()),
            backoff: Mutex::new(HashMap::new()),
        })
    }

    /// Enqueue every unavailable attachment in a solution.
    pub fn sweep(self: &Arc<Self>, solution: &str) {
        let unavailable = match self.shared.store.with_tx(|tx| tx.unavailable_attachments(solution))
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(solution, error = %err, "cannot list unavailable attachments");
                return;
            }
        };
        for attachment in unavailable {
            self.request(attachment);
        }
    }

    /// Start one download unless it is already running or backing off.
    pub fn request(self: &Arc<Self>, attachment: Attachment) {
        if attachment.state != AttachmentState::Unavailable {
            return;
        }
        if attachment.resource_url.is_none() {
            tracing::warn!(
                doc_id = %attachment.doc_id,
                name = %attachment.name,
                "attachment has no resource url"
            );
            return;
        }
        let key = key_of(&attachment);
        if let Some(backoff) = self.backoff.lock().get(&key) {
            if backoff.not_before > self.shared.clock.now() {
                return;
            }
        }
        if !self.in_flight.lock().insert(key.clone()) {
            return;
        }
        let downloader = Arc::clone(self);
        tokio::spawn(async move {
            downloader.run(attachment).await;
            downloader.in_flight.lock().remove(&key);
        });
    }

    async fn run(self: &Arc<Self>, attachment: Attachment) {
        let permit = tokio::select! {
            _ = self.shared.cancel.cancelled() => return,
            permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };
        let outcome = self.fetch(&attachment).await;
        drop(permit);

        let key = key_of(&attachment);
        match outcome {
            Ok(FetchOutcome::Done) => {
                self.backoff.lock().remove(&key);
                if let Err(err) = self.record_available(&attachment) {
                    tracing::warn!(name = %attachment.name, error = %err, "marking available failed");
                }
            }
            Ok(FetchOutcome::Missing) => {
                self.backoff.lock().remove(&key);
                if let Err(err) = self.record_failed(&attachment) {
                    tracing::warn!(name = %attachment.name, error = %err, "marking failed failed");
                }
            }
            Ok(FetchOutcome::Transient) => self.note_backoff(&key),
            Err(err) => {
                tracing::debug!(name = %attachment.name, error = %err, "download failed");
                self.note_backoff(&key);
            }
        }
    }

    async fn fetch(&self, attachment: &Attachment) -> Result<FetchOutcome, crate::EngineError> {
        let resource = attachment.resource_url.clone().unwrap_or_default();
        let url = if resource.starts_with("http://") || resource.starts_with("https://") {
            resource
        } else {
            let base = self.shared.auth.link(aiq_core::LinkRole::Download)?;
            format!("{}/{}", base.trim_end_matches('/'), resource.trim_start_matches('/'))
        };

        let relative = attachment.relative_path();
        let mut writer = self.shared.blobs.writer(&relative)?;
        let mut progress = ProgressThrottle::new(self.shared.clone(), attachment);
        let mut sink = |chunk: &[u8]| -> Result<(), TransportError> {
            writer.append(chunk).map_err(|e| TransportError::Connection(e.to_string()))?;
            progress.note(chunk.len() as u64);
            Ok(())
        };
        let request = HttpRequest::get(url).timeout(self.shared.config.request_timeout);
        let result = self
            .shared
            .auth
            .download_authorized(request, &self.shared.cancel, &mut sink)
            .await;
        drop(sink);

        let (status, streamed) = result?;
        match status {
            200..=299 => {
                if attachment.length > 0 && streamed != attachment.length {
                    tracing::warn!(
                        name = %attachment.name,
                        expected = attachment.length,
                        streamed,
                        "length mismatch, will retry"
                    );
                    return Ok(FetchOutcome::Transient);
                }
                writer.finish()?;
                Ok(FetchOutcome::Done)
            }
            404 | 410 => Ok(FetchOutcome::Missing),
            _ => Ok(FetchOutcome::Transient),
        }
    }

    fn record_available(&self, attachment: &Attachment) -> Result<(), crate::EngineError> {
        let relative = attachment.relative_path();
        let icon_path = self.shared.blobs.absolute(&relative);
        let events = self.shared.store.with_tx(|tx| {
            let mut row = tx.attachment(&attachment.solution, &attachment.doc_id, &attachment.name)?;
            row.state = AttachmentState::Available;
            row.file_path = Some(relative.clone());
            tx.put_attachment(&row)?;
            let mut events = vec![Event::AttachmentAvailable {
                name: row.name.clone(),
                doc_id: row.doc_id.clone(),
                doc_type: row.doc_type.clone(),
                solution: row.solution.clone(),
            }];
            if let Some(event) = launchables::note_icon_available(tx, &row, icon_path.clone())? {
                events.push(event);
            }
            Ok(events)
        })?;
        self.shared.bus.emit_all(events);
        Ok(())
    }

    fn record_failed(&self, attachment: &Attachment) -> Result<(), crate::EngineError> {
        let events = self.shared.store.with_tx(|tx| {
            let mut row = tx.attachment(&attachment.solution, &attachment.doc_id, &attachment.name)?;
            row.state = AttachmentState::Failed;
            row.file_path = None;
            tx.put_attachment(&row)?;
            let mut events = vec![Event::AttachmentFailed {
                name: row.name.clone(),
                doc_id: row.doc_id.clone(),
                doc_type: row.doc_type.clone(),
                solution: row.solution.clone(),
            }];
            if row.doc_type == LAUNCHABLE_TYPE {
                if let Some(launchable) = crate::shared::optional(tx.launchable(&row.doc_id))? {
                    events.push(Event::LaunchableFailed {
                        id: launchable.id,
                        name: launchable.name,
                        solution: launchable.solution,
                    });
                }
            }
            Ok(events)
        })?;
        self.shared.bus.emit_all(events);
        Ok(())
    }

    fn note_backoff(&self, key: &Key) {
        let now = self.shared.clock.now();
        let mut backoff = self.backoff.lock();
        let entry = backoff.entry(key.clone()).or_insert(Backoff { attempts: 0, not_before: now });
        entry.attempts = entry.attempts.saturating_add(1);
        let delay =
            Duration::from_secs(1 << entry.attempts.min(6)).min(self.shared.config.backoff_cap);
        entry.not_before = now + delay;
    }
}

fn key_of(attachment: &Attachment) -> Key {
    (attachment.solution.clone(), attachment.doc_id.clone(), attachment.name.clone())
}

/// Emits progress events at most every 256 KiB or 1 s, whichever first.
struct ProgressThrottle<H: HttpAdapter, C: Clock> {
    shared: Arc<Shared<H, C>>,
    name: String,
    doc_id: String,
    doc_type: String,
    solution: String,
    /// Launchable display name when the blob is an icon asset.
    launchable_name: Option<String>,
    total: u64,
    downloaded: u64,
    since_emit: u64,
    last_emit: Instant,
}

impl<H: HttpAdapter, C: Clock> ProgressThrottle<H, C> {
    fn new(shared: Arc<Shared<H, C>>, attachment: &Attachment) -> Self {
        let last_emit = shared.clock.now();
        let launchable_name = (attachment.doc_type == LAUNCHABLE_TYPE)
            .then(|| {
                shared
                    .store
                    .with_tx(|tx| tx.launchable(&attachment.doc_id))
                    .ok()
                    .map(|l| l.name)
            })
            .flatten();
        Self {
            shared,
            name: attachment.name.clone(),
            doc_id: attachment.doc_id.clone(),
            doc_type: attachment.doc_type.clone(),
            solution: attachment.solution.clone(),
            launchable_name,
            total: attachment.length,
            downloaded: 0,
            since_emit: 0,
            last_emit,
        }
    }

    fn note(&mut self, bytes: u64) {
        self.downloaded += bytes;
        self.since_emit += bytes;
        let now = self.shared.clock.now();
        if self.since_emit < PROGRESS_BYTES && now.duration_since(self.last_emit) < PROGRESS_INTERVAL
        {
            return;
        }
        self.since_emit = 0;
        self.last_emit = now;
        let event = match &self.launchable_name {
            Some(launchable_name) => Event::LaunchableProgress {
                id: self.doc_id.clone(),
                name: launchable_name.clone(),
                solution: self.solution.clone(),
                downloaded: self.downloaded,
                total: self.total,
            },
            None => Event::AttachmentProgress {
                name: self.name.clone(),
                doc_id: self.doc_id.clone(),
                doc_type: self.doc_type.clone(),
                solution: self.solution.clone(),
                downloaded: self.downloaded,
                total: self.total,
            },
        };
        self.shared.bus.emit(event);
    }
}

#[cfg(test)]
#[path = "downloader_tests.rs"]
mod tests;
