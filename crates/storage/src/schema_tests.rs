// SPDX-License-Identifier: MIT

use super::*;

#[test]
fn migrate_is_idempotent() {
    let mut conn = Connection::open_in_memory().unwrap();
    migrate(&mut conn).unwrap();
    migrate(&mut conn).unwrap();
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0)).unwrap();
    assert_eq!(version, MIGRATIONS.len() as i64);
}

#[test]
fn migrated_schema_has_expected_tables() {
    let mut conn = Connection::open_in_memory().unwrap();
    migrate(&mut conn).unwrap();
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .unwrap();
    let tables: Vec<String> =
        stmt.query_map([], |row| row.get(0)).unwrap().map(|r| r.unwrap()).collect();
    for expected in [
        "attachments",
        "deferred_changes",
        "documents",
        "inbound_messages",
        "launchables",
        "outbound_messages",
        "session_properties",
    ] {
        assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
    }
}
