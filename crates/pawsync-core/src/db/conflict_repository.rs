//! Conflict record storage

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::{Error, Result};
use crate::models::{EntityId, ResolutionStrategy, SyncConflict};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{json_text, parse_column, parse_json};

/// A conflict about to be opened
#[derive(Debug, Clone, PartialEq)]
pub struct NewConflict {
    pub entity_id: EntityId,
    pub local_value: Value,
    pub remote_value: Value,
    pub remote_version: i64,
    pub fields: Vec<String>,
}

/// Trait for conflict storage operations
pub trait ConflictRepository {
    /// Open a conflict, replacing any still-open one for the same entity
    fn open(&self, conflict: &NewConflict, now: i64) -> Result<SyncConflict>;

    /// The unresolved conflict for an entity
    fn find_open(&self, entity_id: &EntityId) -> Result<Option<SyncConflict>>;

    /// All unresolved conflicts, oldest first
    fn list_open(&self) -> Result<Vec<SyncConflict>>;

    /// Recently resolved conflicts, newest first
    fn list_resolved(&self, limit: usize) -> Result<Vec<SyncConflict>>;

    /// Close the open conflict for an entity
    fn resolve(&self, entity_id: &EntityId, strategy: ResolutionStrategy, now: i64) -> Result<()>;

    /// Number of unresolved conflicts
    fn count_open(&self) -> Result<usize>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

const CONFLICT_COLUMNS: &str = "id, entity_id, local_value, remote_value, remote_version, fields,
     detected_at, resolution_strategy, resolved, resolved_at";

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncConflict> {
        let strategy: Option<String> = row.get(7)?;
        Ok(SyncConflict {
            id: row.get(0)?,
            entity_id: parse_column(row, 1)?,
            local_value: parse_json(row, 2)?,
            remote_value: parse_json(row, 3)?,
            remote_version: row.get(4)?,
            fields: parse_fields(row, 5)?,
            detected_at: row.get(6)?,
            resolution_strategy: strategy.as_deref().and_then(ResolutionStrategy::parse),
            resolved: row.get::<_, i32>(8)? != 0,
            resolved_at: row.get(9)?,
        })
    }
}

fn parse_fields(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(error))
    })
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn open(&self, conflict: &NewConflict, now: i64) -> Result<SyncConflict> {
        // A newer remote divergence replaces the stale one.
        self.conn.execute(
            "DELETE FROM sync_conflicts WHERE entity_id = ? AND resolved = 0",
            params![conflict.entity_id.as_str()],
        )?;

        self.conn.execute(
            "INSERT INTO sync_conflicts (entity_id, local_value, remote_value, remote_version,
                fields, detected_at, resolved)
             VALUES (?, ?, ?, ?, ?, ?, 0)",
            params![
                conflict.entity_id.as_str(),
                json_text(&conflict.local_value)?,
                json_text(&conflict.remote_value)?,
                conflict.remote_version,
                serde_json::to_string(&conflict.fields)?,
                now,
            ],
        )?;

        tracing::info!(
            entity_id = %conflict.entity_id,
            fields = ?conflict.fields,
            "conflict requires manual resolution"
        );

        self.find_open(&conflict.entity_id)?
            .ok_or_else(|| Error::Database("conflict vanished after insert".to_string()))
    }

    fn find_open(&self, entity_id: &EntityId) -> Result<Option<SyncConflict>> {
        let conflict = self
            .conn
            .query_row(
                &format!(
                    "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE entity_id = ? AND resolved = 0"
                ),
                params![entity_id.as_str()],
                Self::parse_conflict,
            )
            .optional()?;
        Ok(conflict)
    }

    fn list_open(&self) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE resolved = 0 ORDER BY detected_at ASC, id ASC"
        ))?;
        let conflicts = stmt
            .query_map([], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conflicts)
    }

    fn list_resolved(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONFLICT_COLUMNS}
             FROM sync_conflicts
             WHERE resolved = 1
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?"
        ))?;
        let conflicts = stmt
            .query_map(params![limit as i64], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conflicts)
    }

    fn resolve(&self, entity_id: &EntityId, strategy: ResolutionStrategy, now: i64) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE sync_conflicts
             SET resolved = 1, resolution_strategy = ?, resolved_at = ?
             WHERE entity_id = ? AND resolved = 0",
            params![strategy.as_str(), now, entity_id.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!("open conflict for {entity_id}")));
        }
        Ok(())
    }

    fn count_open(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_conflicts WHERE resolved = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
