// SPDX-License-Identifier: MIT

//! Transactional row store over a single SQLite connection.
//!
//! The connection is shared behind a mutex; [`DataStore::with_tx`] is the
//! only entry point, so every caller works inside one transaction and
//! multi-row writes commit or roll back atomically.

use crate::error::StorageError;
use crate::schema;
use aiq_core::{
    Attachment, AttachmentDescriptor, AttachmentState, Document, InboundMessage, Launchable,
    OutboundMessage, OutboundState, RejectionReason, SyncStatus,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Handle to the relational store. Cheap to clone.
#[derive(Clone)]
pub struct DataStore {
    conn: Arc<Mutex<Connection>>,
}

impl DataStore {
    /// Open (and migrate) the database file, creating it if absent.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let mut conn = Connection::open(path)?;
        Self::configure(&conn)?;
        schema::migrate(&mut conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let mut conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        schema::migrate(&mut conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn configure(conn: &Connection) -> Result<(), StorageError> {
        // journal_mode returns the resulting mode as a row
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }

    /// Run `f` inside one transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// Readers see a consistent snapshot; a streaming callback that signals
    /// an error aborts its iteration and rolls the transaction back.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&Tx<'_>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        match f(&Tx { conn: &tx }) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }
}

/// One open transaction. All row operations live here.
pub struct Tx<'a> {
    conn: &'a Connection,
}

// -- documents --

impl Tx<'_> {
    /// Insert or replace a synchronizing document row.
    pub fn put_document(&self, doc: &Document) -> Result<(), StorageError> {
        self.put_document_inner(doc, false)
    }

    /// Insert or replace a device-local document row (never synchronized).
    pub fn put_local_document(&self, doc: &Document) -> Result<(), StorageError> {
        self.put_document_inner(doc, true)
    }

    fn put_document_inner(&self, doc: &Document, local: bool) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO documents (solution, id, type, revision, status, rejection_reason, fields, local)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (solution, id) DO UPDATE SET
                 type = excluded.type,
                 revision = excluded.revision,
                 status = excluded.status,
                 rejection_reason = excluded.rejection_reason,
                 fields = excluded.fields",
            params![
                doc.solution,
                doc.id,
                doc.doc_type,
                doc.revision,
                doc.status.to_string(),
                doc.rejection_reason.map(|r| r.to_string()),
                Value::Object(doc.fields.clone()).to_string(),
                local,
            ],
        )?;
        Ok(())
    }

    pub fn document(&self, solution: &str, id: &str) -> Result<Document, StorageError> {
        self.conn
            .query_row(
                "SELECT solution, id, type, revision, status, rejection_reason, fields
                 FROM documents WHERE solution = ?1 AND id = ?2",
                params![solution, id],
                document_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::DocumentNotFound {
                solution: solution.to_string(),
                id: id.to_string(),
            })
    }

    /// Whether a row belongs to the device-local scope that never syncs.
    pub fn document_is_local(&self, solution: &str, id: &str) -> Result<bool, StorageError> {
        let local: Option<bool> = self
            .conn
            .query_row(
                "SELECT local FROM documents WHERE solution = ?1 AND id = ?2",
                params![solution, id],
                |row| row.get(0),
            )
            .optional()?;
        local.ok_or_else(|| StorageError::DocumentNotFound {
            solution: solution.to_string(),
            id: id.to_string(),
        })
    }

    pub fn document_exists(&self, solution: &str, id: &str) -> Result<bool, StorageError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM documents WHERE solution = ?1 AND id = ?2",
                params![solution, id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Remove the row outright. Returns whether a row existed.
    pub fn delete_document(&self, solution: &str, id: &str) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM documents WHERE solution = ?1 AND id = ?2",
            params![solution, id],
        )?;
        Ok(affected > 0)
    }

    /// Stream documents of one type through `processor`.
    ///
    /// A processor error aborts iteration; the enclosing transaction rolls
    /// back when the error propagates out of `with_tx`.
    pub fn documents_of_type(
        &self,
        solution: &str,
        doc_type: &str,
        mut processor: impl FnMut(Document) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT solution, id, type, revision, status, rejection_reason, fields
             FROM documents WHERE solution = ?1 AND type = ?2 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![solution, doc_type], document_from_row)?;
        for row in rows {
            processor(row?)?;
        }
        Ok(())
    }

    /// Stream the distinct document types within a solution.
    pub fn document_types(
        &self,
        solution: &str,
        mut processor: impl FnMut(String) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT type FROM documents WHERE solution = ?1 ORDER BY type",
        )?;
        let rows = stmt.query_map(params![solution], |row| row.get::<_, String>(0))?;
        for row in rows {
            processor(row?)?;
        }
        Ok(())
    }

    /// Documents awaiting push, in push order: creates, updates, deletes.
    pub fn pending_documents(&self, solution: &str) -> Result<Vec<Document>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT solution, id, type, revision, status, rejection_reason, fields
             FROM documents
             WHERE solution = ?1 AND local = 0 AND status IN ('created', 'updated', 'deleted')
             ORDER BY CASE status
                 WHEN 'created' THEN 0
                 WHEN 'updated' THEN 1
                 ELSE 2
             END, id",
        )?;
        let rows = stmt.query_map(params![solution], document_from_row)?;
        rows.map(|row| row.map_err(StorageError::from)).collect()
    }

    /// Solutions that currently hold any synchronizing rows.
    pub fn known_solutions(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT solution FROM documents WHERE local = 0 ORDER BY solution",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.map(|row| row.map_err(StorageError::from)).collect()
    }

    /// Null every document and attachment revision in a solution.
    ///
    /// Part of `gone` recovery: rows survive, the server re-issues
    /// revisions on the refetch that follows.
    pub fn null_revisions(&self, solution: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE documents SET revision = NULL WHERE solution = ?1",
            params![solution],
        )?;
        self.conn.execute(
            "UPDATE attachments SET revision = NULL WHERE solution = ?1",
            params![solution],
        )?;
        Ok(())
    }
}

// -- attachments --

impl Tx<'_> {
    pub fn put_attachment(&self, att: &Attachment) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO attachments (solution, doc_id, doc_type, name, content_type, revision,
                                      status, state, resource_url, file_path, length, rejection_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT (solution, doc_id, name) DO UPDATE SET
                 doc_type = excluded.doc_type,
                 content_type = excluded.content_type,
                 revision = excluded.revision,
                 status = excluded.status,
                 state = excluded.state,
                 resource_url = excluded.resource_url,
                 file_path = excluded.file_path,
                 length = excluded.length,
                 rejection_reason = excluded.rejection_reason",
            params![
                att.solution,
                att.doc_id,
                att.doc_type,
                att.name,
                att.content_type,
                att.revision,
                att.status.to_string(),
                att.state.to_string(),
                att.resource_url,
                att.file_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                att.length as i64,
                att.rejection_reason.map(|r| r.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn attachment(
        &self,
        solution: &str,
        doc_id: &str,
        name: &str,
    ) -> Result<Attachment, StorageError> {
        self.conn
            .query_row(
                "SELECT solution, doc_id, doc_type, name, content_type, revision, status, state,
                        resource_url, file_path, length, rejection_reason
                 FROM attachments WHERE solution = ?1 AND doc_id = ?2 AND name = ?3",
                params![solution, doc_id, name],
                attachment_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::AttachmentNotFound {
                doc_id: doc_id.to_string(),
                name: name.to_string(),
            })
    }

    pub fn attachments_for_document(
        &self,
        solution: &str,
        doc_id: &str,
    ) -> Result<Vec<Attachment>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT solution, doc_id, doc_type, name, content_type, revision, status, state,
                    resource_url, file_path, length, rejection_reason
             FROM attachments WHERE solution = ?1 AND doc_id = ?2 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![solution, doc_id], attachment_from_row)?;
        rows.map(|row| row.map_err(StorageError::from)).collect()
    }

    pub fn delete_attachment(
        &self,
        solution: &str,
        doc_id: &str,
        name: &str,
    ) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM attachments WHERE solution = ?1 AND doc_id = ?2 AND name = ?3",
            params![solution, doc_id, name],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_attachments_for_document(
        &self,
        solution: &str,
        doc_id: &str,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM attachments WHERE solution = ?1 AND doc_id = ?2",
            params![solution, doc_id],
        )?;
        Ok(())
    }

    /// Attachments awaiting push, in push order: creates, updates, deletes.
    pub fn pending_attachments(&self, solution: &str) -> Result<Vec<Attachment>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT solution, doc_id, doc_type, name, content_type, revision, status, state,
                    resource_url, file_path, length, rejection_reason
             FROM attachments
             WHERE solution = ?1 AND status IN ('created', 'updated', 'deleted')
             ORDER BY CASE status
                 WHEN 'created' THEN 0
                 WHEN 'updated' THEN 1
                 ELSE 2
             END, doc_id, name",
        )?;
        let rows = stmt.query_map(params![solution], attachment_from_row)?;
        rows.map(|row| row.map_err(StorageError::from)).collect()
    }

    /// Attachments whose blobs still need downloading.
    pub fn unavailable_attachments(&self, solution: &str) -> Result<Vec<Attachment>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT solution, doc_id, doc_type, name, content_type, revision, status, state,
                    resource_url, file_path, length, rejection_reason
             FROM attachments WHERE solution = ?1 AND state = 'unavailable'
             ORDER BY doc_id, name",
        )?;
        let rows = stmt.query_map(params![solution], attachment_from_row)?;
        rows.map(|row| row.map_err(StorageError::from)).collect()
    }
}

// -- client-originated messages --

impl Tx<'_> {
    pub fn insert_outbound(&self, msg: &OutboundMessage) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO outbound_messages (id, destination, payload, attachments, from_launchable,
                                            urgent, expect_response, state, response_body,
                                            failure_reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                msg.id,
                msg.destination,
                msg.payload.to_string(),
                serde_json::to_string(&msg.attachments)
                    .map_err(|e| StorageError::InvalidArgument(e.to_string()))?,
                msg.from_launchable,
                msg.urgent,
                msg.expect_response,
                msg.state.to_string(),
                msg.response_body.as_ref().map(Value::to_string),
                msg.failure_reason,
                msg.created_at as i64,
            ],
        )?;
        Ok(())
    }

    pub fn outbound(&self, id: &str) -> Result<OutboundMessage, StorageError> {
        self.conn
            .query_row(
                "SELECT id, destination, payload, attachments, from_launchable, urgent,
                        expect_response, state, response_body, failure_reason, created_at
                 FROM outbound_messages WHERE id = ?1",
                params![id],
                outbound_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::MessageNotFound { id: id.to_string() })
    }

    pub fn update_outbound(&self, msg: &OutboundMessage) -> Result<(), StorageError> {
        let affected = self.conn.execute(
            "UPDATE outbound_messages
             SET state = ?2, response_body = ?3, failure_reason = ?4
             WHERE id = ?1",
            params![
                msg.id,
                msg.state.to_string(),
                msg.response_body.as_ref().map(Value::to_string),
                msg.failure_reason,
            ],
        )?;
        if affected == 0 {
            return Err(StorageError::MessageNotFound { id: msg.id.clone() });
        }
        Ok(())
    }

    pub fn delete_outbound(&self, id: &str) -> Result<bool, StorageError> {
        let affected =
            self.conn.execute("DELETE FROM outbound_messages WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    /// Queued messages for one destination, oldest first.
    pub fn queued_outbound(&self, destination: &str) -> Result<Vec<OutboundMessage>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, destination, payload, attachments, from_launchable, urgent,
                    expect_response, state, response_body, failure_reason, created_at
             FROM outbound_messages
             WHERE destination = ?1 AND state = 'queued'
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![destination], outbound_from_row)?;
        rows.map(|row| row.map_err(StorageError::from)).collect()
    }

    /// Destinations that currently hold queued messages.
    pub fn queued_destinations(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT destination FROM outbound_messages WHERE state = 'queued'
             ORDER BY destination",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.map(|row| row.map_err(StorageError::from)).collect()
    }

    /// Delivery statuses for every message to one destination.
    pub fn outbound_for_destination(
        &self,
        destination: &str,
    ) -> Result<Vec<OutboundMessage>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, destination, payload, attachments, from_launchable, urgent,
                    expect_response, state, response_body, failure_reason, created_at
             FROM outbound_messages WHERE destination = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![destination], outbound_from_row)?;
        rows.map(|row| row.map_err(StorageError::from)).collect()
    }
}

// -- server-originated messages --

impl Tx<'_> {
    pub fn put_inbound(&self, msg: &InboundMessage) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO inbound_messages (id, type, solution, revision, payload, text, created,
                                           active_from, time_to_live, urgent, sound, vibrate,
                                           read, relevance)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT (id) DO UPDATE SET
                 type = excluded.type,
                 solution = excluded.solution,
                 revision = excluded.revision,
                 payload = excluded.payload,
                 text = excluded.text,
                 created = excluded.created,
                 active_from = excluded.active_from,
                 time_to_live = excluded.time_to_live,
                 urgent = excluded.urgent,
                 sound = excluded.sound,
                 vibrate = excluded.vibrate,
                 read = excluded.read,
                 relevance = excluded.relevance",
            params![
                msg.id,
                msg.message_type,
                msg.solution,
                msg.revision,
                msg.payload.to_string(),
                msg.text,
                msg.created as i64,
                msg.active_from as i64,
                msg.time_to_live as i64,
                msg.urgent,
                msg.sound,
                msg.vibrate,
                msg.read,
                msg.relevance.as_ref().map(Value::to_string),
            ],
        )?;
        Ok(())
    }

    pub fn inbound(&self, id: &str) -> Result<InboundMessage, StorageError> {
        self.conn
            .query_row(
                "SELECT id, type, solution, revision, payload, text, created, active_from,
                        time_to_live, urgent, sound, vibrate, read, relevance
                 FROM inbound_messages WHERE id = ?1",
                params![id],
                inbound_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::MessageNotFound { id: id.to_string() })
    }

    pub fn inbound_exists(&self, id: &str) -> Result<bool, StorageError> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM inbound_messages WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    /// Returns false when the message was already read.
    pub fn mark_inbound_read(&self, id: &str) -> Result<bool, StorageError> {
        let affected = self
            .conn
            .execute("UPDATE inbound_messages SET read = 1 WHERE id = ?1 AND read = 0", params![id])?;
        if affected == 0 && !self.inbound_exists(id)? {
            return Err(StorageError::MessageNotFound { id: id.to_string() });
        }
        Ok(affected > 0)
    }

    pub fn delete_inbound(&self, id: &str) -> Result<bool, StorageError> {
        let affected =
            self.conn.execute("DELETE FROM inbound_messages WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    pub fn inbound_of_type(
        &self,
        solution: &str,
        message_type: &str,
        mut processor: impl FnMut(InboundMessage) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, type, solution, revision, payload, text, created, active_from,
                    time_to_live, urgent, sound, vibrate, read, relevance
             FROM inbound_messages WHERE solution = ?1 AND type = ?2 ORDER BY created, id",
        )?;
        let rows = stmt.query_map(params![solution, message_type], inbound_from_row)?;
        for row in rows {
            processor(row?)?;
        }
        Ok(())
    }

    /// Messages whose visibility window has closed.
    pub fn expired_inbound(&self, now_ms: u64) -> Result<Vec<InboundMessage>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, type, solution, revision, payload, text, created, active_from,
                    time_to_live, urgent, sound, vibrate, read, relevance
             FROM inbound_messages WHERE active_from + time_to_live * 1000 < ?1
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![now_ms as i64], inbound_from_row)?;
        rows.map(|row| row.map_err(StorageError::from)).collect()
    }

    /// Smallest time-to-live among stored messages, for the sweep cadence.
    pub fn min_time_to_live(&self) -> Result<Option<u64>, StorageError> {
        let min: Option<i64> = self
            .conn
            .query_row("SELECT MIN(time_to_live) FROM inbound_messages", [], |row| row.get(0))?;
        Ok(min.map(|v| v as u64))
    }
}

// -- launchables --

impl Tx<'_> {
    pub fn put_launchable(&self, launchable: &Launchable) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO launchables (id, name, solution, icon_path, available)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 solution = excluded.solution,
                 icon_path = excluded.icon_path,
                 available = excluded.available",
            params![
                launchable.id,
                launchable.name,
                launchable.solution,
                launchable.icon_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                launchable.available,
            ],
        )?;
        Ok(())
    }

    pub fn launchable(&self, id: &str) -> Result<Launchable, StorageError> {
        self.conn
            .query_row(
                "SELECT id, name, solution, icon_path, available FROM launchables WHERE id = ?1",
                params![id],
                launchable_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::LaunchableNotFound { id: id.to_string() })
    }

    pub fn delete_launchable(&self, id: &str) -> Result<bool, StorageError> {
        let affected = self.conn.execute("DELETE FROM launchables WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    pub fn launchables(&self) -> Result<Vec<Launchable>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, solution, icon_path, available FROM launchables ORDER BY id")?;
        let rows = stmt.query_map([], launchable_from_row)?;
        rows.map(|row| row.map_err(StorageError::from)).collect()
    }
}

// -- session properties --

impl Tx<'_> {
    pub fn property(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn
            .query_row("SELECT value FROM session_properties WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_property(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO session_properties (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn remove_property(&self, key: &str) -> Result<(), StorageError> {
        self.conn.execute("DELETE FROM session_properties WHERE key = ?1", params![key])?;
        Ok(())
    }
}

// -- deferred remote changes (client-wins conflicts) --

impl Tx<'_> {
    /// Park a remote record that lost a client-wins conflict.
    ///
    /// Replaces any earlier deferral for the same document: the newest
    /// remote record is the only one worth re-applying.
    pub fn defer_change(
        &self,
        solution: &str,
        doc_id: &str,
        record: &Value,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO deferred_changes (solution, doc_id, record) VALUES (?1, ?2, ?3)
             ON CONFLICT (solution, doc_id) DO UPDATE SET record = excluded.record",
            params![solution, doc_id, record.to_string()],
        )?;
        Ok(())
    }

    /// Drain every deferred record for a solution.
    pub fn take_deferred(&self, solution: &str) -> Result<Vec<(String, Value)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT doc_id, record FROM deferred_changes WHERE solution = ?1 ORDER BY doc_id",
        )?;
        let rows = stmt.query_map(params![solution], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut drained = Vec::new();
        for row in rows {
            let (doc_id, record) = row?;
            let record: Value = serde_json::from_str(&record)
                .map_err(|e| StorageError::InvalidArgument(e.to_string()))?;
            drained.push((doc_id, record));
        }
        self.conn
            .execute("DELETE FROM deferred_changes WHERE solution = ?1", params![solution])?;
        Ok(drained)
    }
}

// -- row mapping --

fn parse_status(s: &str) -> rusqlite::Result<SyncStatus> {
    match s {
        "created" => Ok(SyncStatus::Created),
        "updated" => Ok(SyncStatus::Updated),
        "deleted" => Ok(SyncStatus::Deleted),
        "synchronized" => Ok(SyncStatus::Synchronized),
        "rejected" => Ok(SyncStatus::Rejected),
        other => Err(conversion_error(format!("unknown status '{other}'"))),
    }
}

fn parse_state(s: &str) -> rusqlite::Result<AttachmentState> {
    match s {
        "available" => Ok(AttachmentState::Available),
        "unavailable" => Ok(AttachmentState::Unavailable),
        "failed" => Ok(AttachmentState::Failed),
        other => Err(conversion_error(format!("unknown attachment state '{other}'"))),
    }
}

fn parse_reason(s: &str) -> rusqlite::Result<RejectionReason> {
    match s {
        "unknown" => Ok(RejectionReason::Unknown),
        "permission denied" => Ok(RejectionReason::PermissionDenied),
        "document not found" => Ok(RejectionReason::DocumentNotFound),
        "type not found" => Ok(RejectionReason::TypeNotFound),
        "restricted type" => Ok(RejectionReason::RestrictedType),
        "create conflict" => Ok(RejectionReason::CreateConflict),
        "update conflict" => Ok(RejectionReason::UpdateConflict),
        "large attachment" => Ok(RejectionReason::LargeAttachment),
        other => Err(conversion_error(format!("unknown rejection reason '{other}'"))),
    }
}

fn parse_outbound_state(s: &str) -> rusqlite::Result<OutboundState> {
    match s {
        "queued" => Ok(OutboundState::Queued),
        "accepted" => Ok(OutboundState::Accepted),
        "rejected" => Ok(OutboundState::Rejected),
        "delivered" => Ok(OutboundState::Delivered),
        "failed" => Ok(OutboundState::Failed),
        other => Err(conversion_error(format!("unknown message state '{other}'"))),
    }
}

fn parse_json(s: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(s).map_err(|e| conversion_error(e.to_string()))
}

fn conversion_error(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    let status: String = row.get(4)?;
    let reason: Option<String> = row.get(5)?;
    let fields: String = row.get(6)?;
    let fields = match parse_json(&fields)? {
        Value::Object(map) => map,
        _ => return Err(conversion_error("document fields are not an object".into())),
    };
    Ok(Document {
        solution: row.get(0)?,
        id: row.get(1)?,
        doc_type: row.get(2)?,
        revision: row.get(3)?,
        status: parse_status(&status)?,
        rejection_reason: reason.as_deref().map(parse_reason).transpose()?,
        fields,
    })
}

fn attachment_from_row(row: &Row<'_>) -> rusqlite::Result<Attachment> {
    let status: String = row.get(6)?;
    let state: String = row.get(7)?;
    let file_path: Option<String> = row.get(9)?;
    let reason: Option<String> = row.get(11)?;
    Ok(Attachment {
        solution: row.get(0)?,
        doc_id: row.get(1)?,
        doc_type: row.get(2)?,
        name: row.get(3)?,
        content_type: row.get(4)?,
        revision: row.get(5)?,
        status: parse_status(&status)?,
        state: parse_state(&state)?,
        resource_url: row.get(8)?,
        file_path: file_path.map(Into::into),
        length: row.get::<_, i64>(10)? as u64,
        rejection_reason: reason.as_deref().map(parse_reason).transpose()?,
    })
}

fn outbound_from_row(row: &Row<'_>) -> rusqlite::Result<OutboundMessage> {
    let payload: String = row.get(2)?;
    let attachments: String = row.get(3)?;
    let state: String = row.get(7)?;
    let response_body: Option<String> = row.get(8)?;
    let attachments: Vec<AttachmentDescriptor> =
        serde_json::from_str(&attachments).map_err(|e| conversion_error(e.to_string()))?;
    Ok(OutboundMessage {
        id: row.get(0)?,
        destination: row.get(1)?,
        payload: parse_json(&payload)?,
        attachments,
        from_launchable: row.get(4)?,
        urgent: row.get(5)?,
        expect_response: row.get(6)?,
        state: parse_outbound_state(&state)?,
        response_body: response_body.as_deref().map(parse_json).transpose()?,
        failure_reason: row.get(9)?,
        created_at: row.get::<_, i64>(10)? as u64,
    })
}

fn inbound_from_row(row: &Row<'_>) -> rusqlite::Result<InboundMessage> {
    let payload: String = row.get(4)?;
    let relevance: Option<String> = row.get(13)?;
    Ok(InboundMessage {
        id: row.get(0)?,
        message_type: row.get(1)?,
        solution: row.get(2)?,
        revision: row.get(3)?,
        payload: parse_json(&payload)?,
        text: row.get(5)?,
        created: row.get::<_, i64>(6)? as u64,
        active_from: row.get::<_, i64>(7)? as u64,
        time_to_live: row.get::<_, i64>(8)? as u64,
        urgent: row.get(9)?,
        sound: row.get(10)?,
        vibrate: row.get(11)?,
        read: row.get(12)?,
        relevance: relevance.as_deref().map(parse_json).transpose()?,
    })
}

fn launchable_from_row(row: &Row<'_>) -> rusqlite::Result<Launchable> {
    let icon_path: Option<String> = row.get(3)?;
    Ok(Launchable {
        id: row.get(0)?,
        name: row.get(1)?,
        solution: row.get(2)?,
        icon_path: icon_path.map(Into::into),
        available: row.get(4)?,
    })
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
