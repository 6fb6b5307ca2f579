// SPDX-License-Identifier: MIT

//! Embedded schema migrations, applied in order and tracked via
//! `PRAGMA user_version`.

use crate::error::StorageError;
use rusqlite::Connection;

const MIGRATIONS: &[&str] = &[
    // v1: initial layout
    r#"
    CREATE TABLE documents (
        solution         TEXT NOT NULL,
        id               TEXT NOT NULL,
        type             TEXT NOT NULL,
        revision         TEXT,
        status           TEXT NOT NULL,
        rejection_reason TEXT,
        fields           TEXT NOT NULL,
        local            INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (solution, id)
    );
    CREATE INDEX documents_by_type ON documents (solution, type);

    CREATE TABLE attachments (
        solution         TEXT NOT NULL,
        doc_id           TEXT NOT NULL,
        doc_type         TEXT NOT NULL,
        name             TEXT NOT NULL,
        content_type     TEXT NOT NULL,
        revision         TEXT,
        status           TEXT NOT NULL,
        state            TEXT NOT NULL,
        resource_url     TEXT,
        file_path        TEXT,
        length           INTEGER NOT NULL DEFAULT 0,
        rejection_reason TEXT,
        PRIMARY KEY (solution, doc_id, name)
    );

    CREATE TABLE outbound_messages (
        id              TEXT PRIMARY KEY,
        destination     TEXT NOT NULL,
        payload         TEXT NOT NULL,
        attachments     TEXT NOT NULL,
        from_launchable TEXT,
        urgent          INTEGER NOT NULL,
        expect_response INTEGER NOT NULL,
        state           TEXT NOT NULL,
        response_body   TEXT,
        failure_reason  TEXT,
        created_at      INTEGER NOT NULL
    );
    CREATE INDEX outbound_by_destination ON outbound_messages (destination, created_at);

    CREATE TABLE inbound_messages (
        id           TEXT PRIMARY KEY,
        type         TEXT NOT NULL,
        solution     TEXT NOT NULL,
        revision     TEXT,
        payload      TEXT NOT NULL,
        text         TEXT NOT NULL,
        created      INTEGER NOT NULL,
        active_from  INTEGER NOT NULL,
        time_to_live INTEGER NOT NULL,
        urgent       INTEGER NOT NULL,
        sound        TEXT,
        vibrate      INTEGER NOT NULL,
        read         INTEGER NOT NULL,
        relevance    TEXT
    );

    CREATE TABLE launchables (
        id        TEXT PRIMARY KEY,
        name      TEXT NOT NULL,
        solution  TEXT NOT NULL,
        icon_path TEXT,
        available INTEGER NOT NULL
    );

    CREATE TABLE session_properties (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE deferred_changes (
        solution TEXT NOT NULL,
        doc_id   TEXT NOT NULL,
        record   TEXT NOT NULL,
        PRIMARY KEY (solution, doc_id)
    );
    "#,
];

/// Bring the database up to the current schema version.
pub(crate) fn migrate(conn: &mut Connection) -> Result<(), StorageError> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let pending = MIGRATIONS.iter().enumerate().skip(version as usize);
    for (index, sql) in pending {
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", index as i64 + 1)?;
        tx.commit()?;
        tracing::debug!(version = index + 1, "applied schema migration");
    }
    Ok(())
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
