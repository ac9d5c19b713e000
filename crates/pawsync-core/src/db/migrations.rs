//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        apply(conn, 1, MIGRATION_V1)?;
    }
    if version < 2 {
        apply(conn, 2, MIGRATION_V2)?;
    }
    if version < 3 {
        apply(conn, 3, MIGRATION_V3)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

/// Apply one migration's statements atomically and record its version
fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for stmt in statements {
        tx.execute(stmt, [])?;
    }
    tx.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version} (target {CURRENT_VERSION})");
    Ok(())
}

/// Version 1: ledger, outbox and sync cursor state
const MIGRATION_V1: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY,
        entity_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        base_payload TEXT,
        local_version INTEGER NOT NULL,
        remote_version INTEGER,
        sync_status TEXT NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type, updated_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_entities_status ON entities(sync_status)",
    // One open entry per entity; coalescing replaces rather than appends.
    "CREATE TABLE IF NOT EXISTS outbox (
        id TEXT PRIMARY KEY,
        entity_id TEXT NOT NULL UNIQUE,
        entity_type TEXT NOT NULL,
        operation TEXT NOT NULL,
        priority INTEGER NOT NULL,
        payload TEXT NOT NULL,
        payload_bytes INTEGER NOT NULL,
        local_version INTEGER NOT NULL,
        sequence INTEGER NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        next_attempt_at INTEGER NOT NULL,
        permanent_failure INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_outbox_drain ON outbox(permanent_failure, priority DESC, sequence ASC)",
    // Local only: cursor, last sync time
    "CREATE TABLE IF NOT EXISTS sync_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
];

/// Version 2: manual conflict tracking
const MIGRATION_V2: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sync_conflicts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id TEXT NOT NULL,
        local_value TEXT NOT NULL,
        remote_value TEXT NOT NULL,
        remote_version INTEGER NOT NULL,
        fields TEXT NOT NULL,
        detected_at INTEGER NOT NULL,
        resolution_strategy TEXT,
        resolved INTEGER NOT NULL DEFAULT 0,
        resolved_at INTEGER
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_conflicts_open
        ON sync_conflicts(entity_id) WHERE resolved = 0",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_detected_at ON sync_conflicts(detected_at DESC)",
];

/// Version 3: sync session history
const MIGRATION_V3: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sync_sessions (
        id TEXT PRIMARY KEY,
        trigger TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        completed_at INTEGER,
        pulled_count INTEGER NOT NULL DEFAULT 0,
        pushed_count INTEGER NOT NULL DEFAULT 0,
        failure_count INTEGER NOT NULL DEFAULT 0,
        outcome TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_sessions_started_at ON sync_sessions(started_at DESC)",
];
