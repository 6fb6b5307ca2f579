// SPDX-License-Identifier: MIT

//! Session lifecycle and the application-facing API.
//!
//! At most one session is open per process and per data directory: a
//! module-owned exclusion token guards the process, an advisory lock file
//! guards the directory (and releases itself if the process dies). Opening
//! authenticates, persists the token and link directory for resume, and
//! starts the scheduler, operation queue and notification bus. Everything
//! the application touches goes through [`Session`].

use crate::auth::AuthHandle;
use crate::bus::NotificationBus;
use crate::config::EngineConfig;
use crate::context::ContextAggregator;
use crate::direct::{direct_call, DirectCallError, DirectCallRequest, DirectCallResponse};
use crate::downloader::Downloader;
use crate::error::EngineError;
use crate::messaging::{Messaging, SendMessageParams};
use crate::queue::OperationQueue;
use crate::scheduler::Scheduler;
use crate::shared::{optional, Shared};
use crate::sync::Synchronizer;
use aiq_core::{
    sanitize_fields, Attachment, AttachmentState, Clock, Document, Event, EventKind,
    InboundMessage, Launchable, OutboundMessage, SyncStatus, UuidIdGen,
};
use aiq_storage::{BlobStore, DataStore, StorageError, DB_FILE};
use aiq_transport::{token_request, AuthResponse, Credentials, HttpAdapter, HttpRequest};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// File holding resumable session state inside the data directory.
pub const SESSION_FILE: &str = "session.json";
/// Attachment blob root inside the data directory.
const ATTACHMENTS_DIR: &str = "attachments";
const LOCK_FILE: &str = "session.lock";

const SYNC_JOB: &str = "sync";
const BATCH_JOB: &str = "message-batch";
const EXPIRY_JOB: &str = "message-expiry";

/// Module-owned exclusion token: one open session per process.
static SESSION_OPEN: AtomicBool = AtomicBool::new(false);

struct ProcessGuard;

impl ProcessGuard {
    fn acquire() -> Result<Self, EngineError> {
        if SESSION_OPEN
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::SessionAlreadyOpen);
        }
        Ok(Self)
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        SESSION_OPEN.store(false, Ordering::SeqCst);
    }
}

/// Advisory lock on the data directory; a crashed process releases it
/// automatically.
struct DirLock {
    _file: std::fs::File,
}

impl DirLock {
    fn acquire(data_dir: &Path) -> Result<Self, EngineError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(data_dir.join(LOCK_FILE))
            .map_err(StorageError::from)?;
        file.try_lock_exclusive().map_err(|_| EngineError::SessionAlreadyOpen)?;
        Ok(Self { _file: file })
    }
}

/// Resumable session state persisted next to the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFile {
    pub base_url: String,
    pub access_token: Option<String>,
    pub links: aiq_core::LinkDirectory,
    pub user_info: Value,
    #[serde(default)]
    pub known_sessions: Vec<String>,
}

impl SessionFile {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(SESSION_FILE)
    }

    pub fn load(path: &Path) -> Option<Self> {
        let bytes = std::fs::read(path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(file) => Some(file),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "unreadable session file");
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        std::fs::write(path, bytes).map_err(StorageError::from)?;
        Ok(())
    }

    /// Rewrite only the token; best-effort, used on re-auth and close.
    pub(crate) fn update_token(path: &Path, token: Option<&str>) {
        if let Some(mut file) = Self::load(path) {
            file.access_token = token.map(str::to_string);
            if let Err(err) = file.save(path) {
                tracing::warn!(error = %err, "session file not updated");
            }
        }
    }
}

/// Typed view over the logged-in user's profile.
#[derive(Debug, Clone)]
pub struct UserInfo(Value);

impl UserInfo {
    pub fn username(&self) -> Option<&str> {
        self.0.get("username").and_then(Value::as_str)
    }

    pub fn email(&self) -> Option<&str> {
        self.0.get("email").and_then(Value::as_str)
    }

    pub fn full_name(&self) -> Option<&str> {
        self.0.get("fullName").and_then(Value::as_str)
    }

    pub fn groups(&self) -> Vec<String> {
        self.strings("groups")
    }

    pub fn permissions(&self) -> Vec<String> {
        self.strings("permissions")
    }

    pub fn roles(&self) -> Vec<String> {
        self.strings("roles")
    }

    pub fn profile(&self) -> Value {
        self.0.get("profile").cloned().unwrap_or(Value::Null)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    fn strings(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(|values| {
                values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
            })
            .unwrap_or_default()
    }
}

struct SessionInner<H: HttpAdapter, C: Clock> {
    shared: Arc<Shared<H, C>>,
    scheduler: Scheduler<C>,
    queue: OperationQueue,
    synchronizer: Arc<Synchronizer<H, C>>,
    messaging: Arc<Messaging<H, C>>,
    context: Arc<ContextAggregator>,
    username: String,
    closed: AtomicBool,
    locks: parking_lot::Mutex<Option<(ProcessGuard, DirLock)>>,
}

/// An open session. Cheap to clone; all clones share one engine.
pub struct Session<H: HttpAdapter, C: Clock> {
    inner: Arc<SessionInner<H, C>>,
}

impl<H: HttpAdapter, C: Clock> std::fmt::Debug for Session<H, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("username", &self.inner.username).finish()
    }
}

impl<H: HttpAdapter, C: Clock> Clone for Session<H, C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<H: HttpAdapter, C: Clock> Session<H, C> {
    /// Authenticate and open a new session.
    ///
    /// Dropping the returned future aborts the in-flight open without side
    /// effects beyond the token request itself.
    pub async fn open(
        config: EngineConfig,
        http: H,
        clock: C,
        credentials: Credentials,
    ) -> Result<Self, EngineError> {
        let process_guard = ProcessGuard::acquire()?;
        std::fs::create_dir_all(&config.data_dir).map_err(StorageError::from)?;
        let dir_lock = DirLock::acquire(&config.data_dir)?;

        let request = token_request(&config.base_url, &credentials, config.request_timeout);
        let response = http
            .send(request, &CancellationToken::new())
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "authentication transport failure");
                EngineError::BackendUnavailable { status: None }
            })?;
        let auth = match response.status {
            status if (200..300).contains(&status) => AuthResponse::parse(&response)?,
            400 | 401 | 403 => return Err(EngineError::CredentialsError),
            status => return Err(EngineError::BackendUnavailable { status: Some(status) }),
        };

        let username = credentials.username.clone();
        Self::assemble(config, http, clock, auth, Some(credentials), username, process_guard, dir_lock)
    }

    /// Whether a prior session's token and links are on disk.
    pub fn can_resume(config: &EngineConfig) -> bool {
        SessionFile::load(&SessionFile::path(&config.data_dir))
            .map(|file| file.access_token.is_some())
            .unwrap_or(false)
    }

    /// Rehydrate the last session without contacting the server.
    ///
    /// Reauthentication is deferred to the first 401; since credentials
    /// are never persisted, that 401 closes the session.
    pub async fn resume(config: EngineConfig, http: H, clock: C) -> Result<Self, EngineError> {
        let process_guard = ProcessGuard::acquire()?;
        std::fs::create_dir_all(&config.data_dir).map_err(StorageError::from)?;
        let dir_lock = DirLock::acquire(&config.data_dir)?;

        let file = SessionFile::load(&SessionFile::path(&config.data_dir))
            .ok_or(EngineError::NothingToResume)?;
        let token = file.access_token.clone().ok_or(EngineError::NothingToResume)?;
        let username = file
            .user_info
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let auth = AuthResponse {
            access_token: token,
            expires_in: None,
            links: file.links.clone(),
            user: file.user_info.clone(),
        };
        Self::assemble(config, http, clock, auth, None, username, process_guard, dir_lock)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        config: EngineConfig,
        http: H,
        clock: C,
        auth: AuthResponse,
        credentials: Option<Credentials>,
        username: String,
        process_guard: ProcessGuard,
        dir_lock: DirLock,
    ) -> Result<Self, EngineError> {
        let session_file_path = SessionFile::path(&config.data_dir);
        let bus = NotificationBus::start();
        let cancel = CancellationToken::new();

        let store = DataStore::open(&config.data_dir.join(DB_FILE))?;
        let blobs = BlobStore::open(config.data_dir.join(ATTACHMENTS_DIR))?;

        let auth_handle = AuthHandle::new(
            http,
            config.base_url.clone(),
            config.request_timeout,
            bus.clone(),
            cancel.clone(),
            session_file_path.clone(),
        );
        let token = auth.access_token.clone();
        let links = auth.links.clone();
        let user_info = auth.user.clone();
        auth_handle.install(auth, credentials);

        // persist resumable state, folding in previously seen users
        let mut known_sessions = SessionFile::load(&session_file_path)
            .map(|file| file.known_sessions)
            .unwrap_or_default();
        if !username.is_empty() && !known_sessions.contains(&username) {
            known_sessions.push(username.clone());
        }
        SessionFile {
            base_url: config.base_url.clone(),
            access_token: Some(token),
            links,
            user_info,
            known_sessions,
        }
        .save(&session_file_path)?;

        let shared = Arc::new(Shared {
            config: config.clone(),
            clock: clock.clone(),
            store,
            blobs,
            bus: bus.clone(),
            auth: auth_handle,
            ids: Arc::new(UuidIdGen),
            cancel: cancel.clone(),
        });

        let queue = OperationQueue::start(
            config.queue_bound,
            config.queue_concurrency,
            config.pull_timeout() + config.request_timeout,
            cancel.clone(),
        );
        let downloader = Downloader::new(Arc::clone(&shared));
        let synchronizer = Synchronizer::new(Arc::clone(&shared), Arc::clone(&downloader));
        let messaging = Messaging::new(Arc::clone(&shared), queue.clone());
        let context = ContextAggregator::new(shared.store.clone(), bus.clone());

        let scheduler = Scheduler::new(clock, config.poll_interval, cancel.clone());
        {
            let synchronizer = Arc::clone(&synchronizer);
            let queue = queue.clone();
            scheduler.schedule(
                SYNC_JOB,
                config.sync_interval,
                true,
                Box::new(move || synchronizer.schedule_all(&queue)),
            );
        }
        {
            let messaging = Arc::clone(&messaging);
            scheduler.schedule(
                BATCH_JOB,
                config.message_batch_interval,
                false,
                Box::new(move || messaging.schedule_batches()),
            );
        }
        arm_expiry_job(&scheduler, &messaging);
        scheduler.start();

        // resume any downloads interrupted by the previous run
        if let Ok(solutions) = shared.store.with_tx(|tx| tx.known_solutions()) {
            for solution in solutions {
                downloader.sweep(&solution);
            }
        }

        bus.emit(Event::SessionOpened { username: username.clone() });
        tracing::info!(%username, "session opened");

        Ok(Self {
            inner: Arc::new(SessionInner {
                shared,
                scheduler,
                queue,
                synchronizer,
                messaging,
                context,
                username,
                closed: AtomicBool::new(false),
                locks: parking_lot::Mutex::new(Some((process_guard, dir_lock))),
            }),
        })
    }

    /// Log out and stop all background work. Documents survive on disk,
    /// but the purged token means the session cannot be resumed.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = &self.inner.shared;
        if let Ok(link) = shared.auth.link(aiq_core::LinkRole::Logout) {
            let request = HttpRequest::post(link).timeout(Duration::from_secs(5));
            if let Err(err) = shared.auth.send_authorized(request, &CancellationToken::new()).await
            {
                tracing::debug!(error = %err, "logout request failed");
            }
        }
        shared.auth.clear();
        SessionFile::update_token(&SessionFile::path(&shared.config.data_dir), None);
        shared.bus.emit(Event::SessionClosed {});
        self.inner.queue.cancel_all();
        shared.cancel.cancel();
        self.inner.locks.lock().take();
        tracing::info!(username = %self.inner.username, "session closed");
    }

    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst) && self.inner.shared.auth.is_open()
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(EngineError::InvalidArgument("session is closed".into()))
        }
    }

    // -- events --

    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<Event> {
        self.inner.shared.bus.subscribe_all()
    }

    pub fn subscribe(&self, kinds: impl IntoIterator<Item = EventKind>) -> mpsc::UnboundedReceiver<Event> {
        self.inner.shared.bus.subscribe(kinds)
    }

    // -- session info --

    pub fn username(&self) -> &str {
        &self.inner.username
    }

    pub fn user_info(&self) -> UserInfo {
        UserInfo(self.inner.shared.auth.user())
    }

    pub fn solutions(&self) -> Result<Vec<String>, EngineError> {
        self.inner.synchronizer.solutions()
    }

    // -- synchronization control --

    /// Run a sync cycle on the next scheduler tick.
    pub fn synchronize_now(&self) {
        self.inner.scheduler.force(SYNC_JOB);
    }

    /// Abort all pending and in-flight operations for all solutions.
    /// Changes already acknowledged by the server stay synchronized.
    pub fn cancel_synchronization(&self) {
        self.inner.queue.cancel_all();
    }

    pub fn pause_scheduler(&self) {
        self.inner.scheduler.pause();
    }

    pub fn resume_scheduler(&self) {
        self.inner.scheduler.resume();
    }

    // -- documents --

    /// Create a document locally; it synchronizes on the next push.
    pub fn create_document(
        &self,
        solution: &str,
        doc_type: &str,
        fields: Map<String, Value>,
    ) -> Result<Value, EngineError> {
        self.ensure_open()?;
        validate_type(doc_type)?;
        validate_solution(solution)?;
        let doc = Document::local(
            self.inner.shared.ids.next_id(),
            doc_type,
            solution,
            fields,
        );
        self.inner.shared.store.with_tx(|tx| tx.put_document(&doc))?;
        self.inner.shared.bus.emit(Event::DocumentCreated {
            id: doc.id.clone(),
            doc_type: doc.doc_type.clone(),
            solution: doc.solution.clone(),
        });
        Ok(doc.to_record())
    }

    /// Merge fields into a document. A `null` value removes its key.
    pub fn update_document(
        &self,
        solution: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Value, EngineError> {
        self.ensure_open()?;
        let updated = self.inner.shared.store.with_tx(|tx| {
            let mut doc = visible_document(tx, solution, id)?;
            if doc.doc_type.starts_with('_') {
                return Err(StorageError::InvalidArgument("system documents are immutable".into()));
            }
            if tx.document_is_local(solution, id)? {
                return Err(StorageError::InvalidArgument(
                    "document is local; use the local document API".into(),
                ));
            }
            for (key, value) in sanitize_fields(fields) {
                if value.is_null() {
                    doc.fields.remove(&key);
                } else {
                    doc.fields.insert(key, value);
                }
            }
            doc.status = match doc.status {
                SyncStatus::Created => SyncStatus::Created,
                // a write clears a rejection and requeues the document
                _ => SyncStatus::Updated,
            };
            doc.rejection_reason = None;
            tx.put_document(&doc)?;
            Ok(doc)
        })?;
        self.inner.shared.bus.emit(Event::DocumentUpdated {
            id: updated.id.clone(),
            doc_type: updated.doc_type.clone(),
            solution: updated.solution.clone(),
        });
        Ok(updated.to_record())
    }

    /// Mark a document deleted. A document the server never saw is purged
    /// outright.
    pub fn delete_document(&self, solution: &str, id: &str) -> Result<(), EngineError> {
        self.ensure_open()?;
        let doc = self.inner.shared.store.with_tx(|tx| {
            let mut doc = visible_document(tx, solution, id)?;
            if doc.doc_type.starts_with('_') {
                return Err(StorageError::InvalidArgument("system documents are immutable".into()));
            }
            if tx.document_is_local(solution, id)? {
                return Err(StorageError::InvalidArgument(
                    "document is local; use the local document API".into(),
                ));
            }
            if doc.revision.is_none() {
                tx.delete_document(solution, id)?;
                tx.delete_attachments_for_document(solution, id)?;
            } else {
                doc.status = SyncStatus::Deleted;
                doc.rejection_reason = None;
                tx.put_document(&doc)?;
            }
            Ok(doc)
        })?;
        if doc.revision.is_none() {
            let _ = self.inner.shared.blobs.remove_document(solution, id);
        }
        self.inner.shared.bus.emit(Event::DocumentDeleted {
            id: doc.id,
            doc_type: doc.doc_type,
            solution: doc.solution,
        });
        Ok(())
    }

    /// Read one document as its merged record.
    pub fn document(&self, solution: &str, id: &str) -> Result<Value, EngineError> {
        self.ensure_open()?;
        let doc = self.inner.shared.store.with_tx(|tx| visible_document(tx, solution, id))?;
        Ok(doc.to_record())
    }

    pub fn document_exists(&self, solution: &str, id: &str) -> Result<bool, EngineError> {
        self.ensure_open()?;
        let found = self
            .inner
            .shared
            .store
            .with_tx(|tx| optional(visible_document(tx, solution, id)))?;
        Ok(found.is_some())
    }

    /// Stream documents of one type as merged records.
    pub fn documents_of_type(
        &self,
        solution: &str,
        doc_type: &str,
        mut processor: impl FnMut(Value) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let mut failure: Option<EngineError> = None;
        let result = self.inner.shared.store.with_tx(|tx| {
            tx.documents_of_type(solution, doc_type, |doc| {
                if doc.status == SyncStatus::Deleted {
                    return Ok(());
                }
                match processor(doc.to_record()) {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        failure = Some(err);
                        Err(StorageError::InvalidArgument("iteration aborted".into()))
                    }
                }
            })
        });
        match result {
            Ok(()) => Ok(()),
            Err(err) => Err(failure.unwrap_or_else(|| err.into())),
        }
    }

    /// Stream the distinct document types in a solution.
    pub fn document_types(
        &self,
        solution: &str,
        mut processor: impl FnMut(String) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let types = self.inner.shared.store.with_tx(|tx| {
            let mut types = Vec::new();
            tx.document_types(solution, |doc_type| {
                types.push(doc_type);
                Ok(())
            })?;
            Ok(types)
        })?;
        for doc_type in types {
            processor(doc_type)?;
        }
        Ok(())
    }

    // -- local documents (device scope, never synchronized) --

    /// Create a document visible only on this device.
    pub fn create_local_document(
        &self,
        solution: &str,
        doc_type: &str,
        fields: Map<String, Value>,
    ) -> Result<Value, EngineError> {
        self.ensure_open()?;
        validate_type(doc_type)?;
        validate_solution(solution)?;
        let mut doc = Document::local(
            self.inner.shared.ids.next_id(),
            doc_type,
            solution,
            fields,
        );
        // local documents never enter the push queue
        doc.status = SyncStatus::Synchronized;
        self.inner.shared.store.with_tx(|tx| tx.put_local_document(&doc))?;
        self.inner.shared.bus.emit(Event::DocumentCreated {
            id: doc.id.clone(),
            doc_type: doc.doc_type.clone(),
            solution: doc.solution.clone(),
        });
        Ok(doc.to_record())
    }

    /// Merge fields into a local document. A `null` value removes its key.
    pub fn update_local_document(
        &self,
        solution: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Value, EngineError> {
        self.ensure_open()?;
        let updated = self.inner.shared.store.with_tx(|tx| {
            if !tx.document_is_local(solution, id)? {
                return Err(StorageError::InvalidArgument(
                    "document is synchronized; use the document API".into(),
                ));
            }
            let mut doc = tx.document(solution, id)?;
            for (key, value) in sanitize_fields(fields) {
                if value.is_null() {
                    doc.fields.remove(&key);
                } else {
                    doc.fields.insert(key, value);
                }
            }
            tx.put_local_document(&doc)?;
            Ok(doc)
        })?;
        self.inner.shared.bus.emit(Event::DocumentUpdated {
            id: updated.id.clone(),
            doc_type: updated.doc_type.clone(),
            solution: updated.solution.clone(),
        });
        Ok(updated.to_record())
    }

    /// Remove a local document and its attachments outright.
    pub fn delete_local_document(&self, solution: &str, id: &str) -> Result<(), EngineError> {
        self.ensure_open()?;
        let doc = self.inner.shared.store.with_tx(|tx| {
            if !tx.document_is_local(solution, id)? {
                return Err(StorageError::InvalidArgument(
                    "document is synchronized; use the document API".into(),
                ));
            }
            let doc = tx.document(solution, id)?;
            tx.delete_document(solution, id)?;
            tx.delete_attachments_for_document(solution, id)?;
            Ok(doc)
        })?;
        let _ = self.inner.shared.blobs.remove_document(solution, id);
        self.inner.shared.bus.emit(Event::DocumentDeleted {
            id: doc.id,
            doc_type: doc.doc_type,
            solution: doc.solution,
        });
        Ok(())
    }

    // -- attachments --

    /// Attach a blob to a document. Fails if the name is taken.
    pub fn create_attachment(
        &self,
        solution: &str,
        doc_id: &str,
        name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<Attachment, EngineError> {
        self.ensure_open()?;
        if name.is_empty() || content_type.is_empty() {
            return Err(EngineError::InvalidArgument(
                "attachment name and content type are required".into(),
            ));
        }
        let shared = &self.inner.shared;
        let doc = shared.store.with_tx(|tx| visible_document(tx, solution, doc_id))?;
        let attachment = Attachment {
            solution: solution.to_string(),
            doc_id: doc_id.to_string(),
            doc_type: doc.doc_type.clone(),
            name: name.to_string(),
            content_type: content_type.to_string(),
            revision: None,
            status: SyncStatus::Created,
            state: AttachmentState::Available,
            resource_url: None,
            file_path: Some(Path::new(solution).join(doc_id).join(name)),
            length: bytes.len() as u64,
            rejection_reason: None,
        };
        shared.blobs.write(&attachment.relative_path(), bytes)?;
        let inserted = shared.store.with_tx(|tx| {
            if optional(tx.attachment(solution, doc_id, name))?
                .map(|a| a.status != SyncStatus::Deleted)
                .unwrap_or(false)
            {
                return Err(StorageError::InvalidArgument(format!(
                    "attachment '{name}' already exists"
                )));
            }
            tx.put_attachment(&attachment)?;
            Ok(attachment.clone())
        })?;
        shared.bus.emit(Event::AttachmentCreated {
            name: inserted.name.clone(),
            doc_id: inserted.doc_id.clone(),
            doc_type: inserted.doc_type.clone(),
            solution: inserted.solution.clone(),
        });
        Ok(inserted)
    }

    /// Replace an attachment's bytes.
    pub fn update_attachment(
        &self,
        solution: &str,
        doc_id: &str,
        name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<Attachment, EngineError> {
        self.ensure_open()?;
        let shared = &self.inner.shared;
        let mut attachment = shared.store.with_tx(|tx| visible_attachment(tx, solution, doc_id, name))?;
        shared.blobs.write(&attachment.relative_path(), bytes)?;
        attachment.content_type = content_type.to_string();
        attachment.length = bytes.len() as u64;
        attachment.state = AttachmentState::Available;
        attachment.file_path = Some(attachment.relative_path());
        attachment.status = match attachment.status {
            SyncStatus::Created => SyncStatus::Created,
            _ => SyncStatus::Updated,
        };
        attachment.rejection_reason = None;
        shared.store.with_tx(|tx| tx.put_attachment(&attachment))?;
        shared.bus.emit(Event::AttachmentUpdated {
            name: attachment.name.clone(),
            doc_id: attachment.doc_id.clone(),
            doc_type: attachment.doc_type.clone(),
            solution: attachment.solution.clone(),
        });
        Ok(attachment)
    }

    /// Mark an attachment deleted; one the server never saw purges now.
    pub fn delete_attachment(
        &self,
        solution: &str,
        doc_id: &str,
        name: &str,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let shared = &self.inner.shared;
        let attachment = shared.store.with_tx(|tx| {
            let mut attachment = visible_attachment(tx, solution, doc_id, name)?;
            if attachment.revision.is_none() {
                tx.delete_attachment(solution, doc_id, name)?;
            } else {
                attachment.status = SyncStatus::Deleted;
                attachment.rejection_reason = None;
                tx.put_attachment(&attachment)?;
            }
            Ok(attachment)
        })?;
        if attachment.revision.is_none() {
            let _ = shared.blobs.remove(&attachment.relative_path());
        }
        shared.bus.emit(Event::AttachmentDeleted {
            name: attachment.name,
            doc_id: attachment.doc_id,
            doc_type: attachment.doc_type,
            solution: attachment.solution,
        });
        Ok(())
    }

    pub fn attachment(
        &self,
        solution: &str,
        doc_id: &str,
        name: &str,
    ) -> Result<Attachment, EngineError> {
        self.ensure_open()?;
        Ok(self
            .inner
            .shared
            .store
            .with_tx(|tx| visible_attachment(tx, solution, doc_id, name))?)
    }

    pub fn attachments_for_document(
        &self,
        solution: &str,
        doc_id: &str,
    ) -> Result<Vec<Attachment>, EngineError> {
        self.ensure_open()?;
        let attachments = self
            .inner
            .shared
            .store
            .with_tx(|tx| tx.attachments_for_document(solution, doc_id))?;
        Ok(attachments.into_iter().filter(|a| a.status != SyncStatus::Deleted).collect())
    }

    /// Read an attachment's bytes. Only `Available` attachments have them.
    pub fn attachment_data(
        &self,
        solution: &str,
        doc_id: &str,
        name: &str,
    ) -> Result<Vec<u8>, EngineError> {
        self.ensure_open()?;
        let shared = &self.inner.shared;
        let attachment = shared.store.with_tx(|tx| visible_attachment(tx, solution, doc_id, name))?;
        if attachment.state != AttachmentState::Available {
            return Err(StorageError::BlobMissing {
                path: shared.blobs.absolute(&attachment.relative_path()),
            }
            .into());
        }
        Ok(shared.blobs.read(&attachment.relative_path())?)
    }

    // -- messaging --

    /// Queue a client-originated message for delivery.
    pub fn send_message(&self, params: SendMessageParams) -> Result<OutboundMessage, EngineError> {
        self.ensure_open()?;
        self.inner.messaging.send(params)
    }

    pub fn status_of_message(&self, id: &str) -> Result<OutboundMessage, EngineError> {
        self.ensure_open()?;
        self.inner.messaging.status_of(id)
    }

    pub fn statuses_for_destination(
        &self,
        destination: &str,
    ) -> Result<Vec<OutboundMessage>, EngineError> {
        self.ensure_open()?;
        self.inner.messaging.statuses_for(destination)
    }

    pub fn message(&self, id: &str) -> Result<InboundMessage, EngineError> {
        self.ensure_open()?;
        self.inner.messaging.message(id)
    }

    /// Stream active messages of one type with their read-time relevance.
    pub fn messages_of_type(
        &self,
        solution: &str,
        message_type: &str,
        processor: impl FnMut(InboundMessage, bool) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let snapshot = self.inner.context.snapshot()?;
        self.inner.messaging.messages_of_type(solution, message_type, &snapshot, processor)
    }

    pub fn mark_message_read(&self, id: &str) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.inner.messaging.mark_read(id)
    }

    pub fn delete_message(&self, id: &str) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.inner.messaging.delete_message(id)
    }

    // -- launchables --

    pub fn launchables(&self) -> Result<Vec<Launchable>, EngineError> {
        self.ensure_open()?;
        Ok(self.inner.shared.store.with_tx(|tx| tx.launchables())?)
    }

    pub fn launchable(&self, id: &str) -> Result<Launchable, EngineError> {
        self.ensure_open()?;
        Ok(self.inner.shared.store.with_tx(|tx| tx.launchable(id))?)
    }

    // -- context --

    pub fn context(&self) -> &Arc<ContextAggregator> {
        &self.inner.context
    }

    pub fn register_context_provider(
        &self,
        provider: Arc<dyn crate::context::ContextProvider>,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.inner.context.register(provider);
        Ok(())
    }

    pub fn context_value(&self, name: &str) -> Result<Value, EngineError> {
        self.ensure_open()?;
        self.inner.context.value_for_name(name)
    }

    pub fn set_context_value(&self, name: &str, value: Value) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.inner.context.set_value(name, value)
    }

    // -- direct calls --

    /// Proxy an arbitrary call through the platform's `direct` endpoint.
    pub async fn direct_call(
        &self,
        call: DirectCallRequest,
    ) -> Result<DirectCallResponse, DirectCallError> {
        if self.ensure_open().is_err() {
            return Err(DirectCallError {
                domain: crate::direct::ERROR_DOMAIN.to_string(),
                code: aiq_core::ErrorKind::InvalidArgument.code(),
                status_code: None,
            });
        }
        direct_call(&self.inner.shared, call, &self.inner.shared.cancel).await
    }

    #[cfg(test)]
    pub(crate) fn testing_parts(
        &self,
    ) -> (Arc<Shared<H, C>>, Arc<Synchronizer<H, C>>, Arc<Messaging<H, C>>, Scheduler<C>, OperationQueue)
    {
        (
            Arc::clone(&self.inner.shared),
            Arc::clone(&self.inner.synchronizer),
            Arc::clone(&self.inner.messaging),
            self.inner.scheduler.clone(),
            self.inner.queue.clone(),
        )
    }
}

/// Keep the expiry sweep running at the smallest stored time-to-live.
fn arm_expiry_job<H: HttpAdapter, C: Clock>(
    scheduler: &Scheduler<C>,
    messaging: &Arc<Messaging<H, C>>,
) {
    let interval = messaging.sweep_interval();
    let scheduler_handle = scheduler.clone();
    let messaging = Arc::clone(messaging);
    scheduler.schedule_once(
        EXPIRY_JOB,
        interval,
        Box::new(move || {
            if let Err(err) = messaging.sweep_expired() {
                tracing::warn!(error = %err, "message expiry sweep failed");
            }
            arm_expiry_job(&scheduler_handle, &messaging);
        }),
    );
}

/// Load a document the application may see: pending deletes are invisible.
fn visible_document(
    tx: &aiq_storage::Tx<'_>,
    solution: &str,
    id: &str,
) -> Result<Document, StorageError> {
    let doc = tx.document(solution, id)?;
    if doc.status == SyncStatus::Deleted {
        return Err(StorageError::DocumentNotFound {
            solution: solution.to_string(),
            id: id.to_string(),
        });
    }
    Ok(doc)
}

fn visible_attachment(
    tx: &aiq_storage::Tx<'_>,
    solution: &str,
    doc_id: &str,
    name: &str,
) -> Result<Attachment, StorageError> {
    let attachment = tx.attachment(solution, doc_id, name)?;
    if attachment.status == SyncStatus::Deleted {
        return Err(StorageError::AttachmentNotFound {
            doc_id: doc_id.to_string(),
            name: name.to_string(),
        });
    }
    Ok(attachment)
}

fn validate_type(doc_type: &str) -> Result<(), EngineError> {
    if doc_type.is_empty() {
        return Err(EngineError::InvalidArgument("document type must not be empty".into()));
    }
    if doc_type.starts_with('_') {
        return Err(EngineError::InvalidArgument(format!(
            "'{doc_type}' is a reserved document type"
        )));
    }
    Ok(())
}

fn validate_solution(solution: &str) -> Result<(), EngineError> {
    if solution.is_empty() {
        return Err(EngineError::InvalidArgument("solution must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
