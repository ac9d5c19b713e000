//! Local ledger of entity records

use crate::error::{Error, Result};
use crate::models::{EntityId, EntityRecord, EntityType, SyncStatus};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{json_text, parse_column, parse_json, parse_json_opt};

/// How a `put` treats sync metadata
#[derive(Debug, Clone, PartialEq)]
pub enum WriteMode {
    /// Caller edit: bump `local_version`, mark `Pending`
    Local,
    /// Remote state adopted verbatim: `Synced` at `remote_version`
    Merged { remote_version: i64 },
    /// Local payload rebased on a newer remote version; still needs a push
    Rebased { remote_version: i64, base: Value },
}

/// Trait for ledger storage operations
pub trait LedgerRepository {
    /// Insert or replace a record, returning the stored state
    fn put(&self, record: &EntityRecord, mode: WriteMode) -> Result<EntityRecord>;

    /// Get a live record by ID (tombstones are not returned)
    fn get(&self, id: &EntityId) -> Result<Option<EntityRecord>>;

    /// Get a record by ID including local tombstones
    fn find(&self, id: &EntityId) -> Result<Option<EntityRecord>>;

    /// List live records of one type, most recently updated first
    fn list_by_type(&self, entity_type: EntityType) -> Result<Vec<EntityRecord>>;

    /// Move `Pending` records to `Syncing`
    fn mark_syncing(&self, ids: &[EntityId]) -> Result<()>;

    /// Move `Syncing` records back to `Pending`
    fn mark_pending(&self, ids: &[EntityId]) -> Result<()>;

    /// Record a remote acknowledgement; acknowledged tombstones are purged
    fn mark_synced(&self, id: &EntityId, remote_version: i64) -> Result<()>;

    /// Freeze a record behind an open conflict
    fn mark_conflict(&self, id: &EntityId) -> Result<()>;

    /// Update the remote version and merge base without touching the payload
    fn set_remote_version(&self, id: &EntityId, remote_version: i64, base: &Value) -> Result<()>;

    /// Remove a record entirely
    fn purge(&self, id: &EntityId) -> Result<()>;

    /// Count records in a given status
    fn count_by_status(&self, status: SyncStatus) -> Result<usize>;
}

/// `SQLite` implementation of `LedgerRepository`
pub struct SqliteLedgerRepository<'a> {
    conn: &'a Connection,
}

const RECORD_COLUMNS: &str = "id, entity_type, payload, base_payload, local_version, remote_version,
     sync_status, is_deleted, created_at, updated_at";

impl<'a> SqliteLedgerRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRecord> {
        Ok(EntityRecord {
            id: parse_column(row, 0)?,
            entity_type: parse_column(row, 1)?,
            payload: parse_json(row, 2)?,
            base_payload: parse_json_opt(row, 3)?,
            local_version: row.get(4)?,
            remote_version: row.get(5)?,
            sync_status: parse_column(row, 6)?,
            is_deleted: row.get::<_, i32>(7)? != 0,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn write(&self, record: &EntityRecord) -> Result<()> {
        let base_payload = record.base_payload.as_ref().map(json_text).transpose()?;
        self.conn.execute(
            "INSERT INTO entities (id, entity_type, payload, base_payload, local_version,
                remote_version, sync_status, is_deleted, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                entity_type = excluded.entity_type,
                payload = excluded.payload,
                base_payload = excluded.base_payload,
                local_version = excluded.local_version,
                remote_version = excluded.remote_version,
                sync_status = excluded.sync_status,
                is_deleted = excluded.is_deleted,
                updated_at = excluded.updated_at",
            params![
                record.id.as_str(),
                record.entity_type.as_str(),
                json_text(&record.payload)?,
                base_payload,
                record.local_version,
                record.remote_version,
                record.sync_status.as_str(),
                i32::from(record.is_deleted),
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    fn set_status(&self, ids: &[EntityId], from: SyncStatus, to: SyncStatus) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE entities SET sync_status = ? WHERE id = ? AND sync_status = ?")?;
        for id in ids {
            stmt.execute(params![to.as_str(), id.as_str(), from.as_str()])?;
        }
        Ok(())
    }
}

impl LedgerRepository for SqliteLedgerRepository<'_> {
    fn put(&self, record: &EntityRecord, mode: WriteMode) -> Result<EntityRecord> {
        let existing = self.find(&record.id)?;
        let now = chrono::Utc::now().timestamp_millis();

        let mut stored = record.clone();
        stored.updated_at = now;
        if let Some(existing) = &existing {
            stored.created_at = existing.created_at;
        }

        match mode {
            WriteMode::Local => {
                let previous = existing.as_ref().unwrap_or(record);
                stored.local_version = previous.next_local_version();
                stored.remote_version = existing.as_ref().and_then(|e| e.remote_version);
                stored.base_payload = existing.as_ref().and_then(|e| e.base_payload.clone());
                stored.sync_status = SyncStatus::Pending;
            }
            WriteMode::Merged { remote_version } => {
                stored.local_version = remote_version;
                stored.remote_version = Some(remote_version);
                stored.base_payload = Some(stored.payload.clone());
                stored.sync_status = SyncStatus::Synced;
                stored.is_deleted = false;
            }
            WriteMode::Rebased {
                remote_version,
                base,
            } => {
                let local = existing.as_ref().map_or(0, |e| e.local_version);
                stored.local_version = local.max(remote_version) + 1;
                stored.remote_version = Some(remote_version);
                stored.base_payload = Some(base);
                stored.sync_status = SyncStatus::Pending;
            }
        }

        self.write(&stored)?;
        tracing::debug!(
            id = %stored.id,
            local_version = stored.local_version,
            status = stored.sync_status.as_str(),
            "ledger put"
        );
        Ok(stored)
    }

    fn get(&self, id: &EntityId) -> Result<Option<EntityRecord>> {
        Ok(self.find(id)?.filter(|record| !record.is_deleted))
    }

    fn find(&self, id: &EntityId) -> Result<Option<EntityRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM entities WHERE id = ?"),
                params![id.as_str()],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    fn list_by_type(&self, entity_type: EntityType) -> Result<Vec<EntityRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS}
             FROM entities
             WHERE entity_type = ? AND is_deleted = 0
             ORDER BY updated_at DESC, id ASC"
        ))?;

        let records = stmt
            .query_map(params![entity_type.as_str()], Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn mark_syncing(&self, ids: &[EntityId]) -> Result<()> {
        self.set_status(ids, SyncStatus::Pending, SyncStatus::Syncing)
    }

    fn mark_pending(&self, ids: &[EntityId]) -> Result<()> {
        self.set_status(ids, SyncStatus::Syncing, SyncStatus::Pending)
    }

    fn mark_synced(&self, id: &EntityId, remote_version: i64) -> Result<()> {
        let record = self
            .find(id)?
            .ok_or_else(|| Error::NotFound(format!("entity {id}")))?;

        if record.is_deleted {
            return self.purge(id);
        }

        self.conn.execute(
            "UPDATE entities
             SET local_version = ?, remote_version = ?, base_payload = payload, sync_status = ?
             WHERE id = ?",
            params![
                remote_version,
                remote_version,
                SyncStatus::Synced.as_str(),
                id.as_str()
            ],
        )?;
        Ok(())
    }

    fn mark_conflict(&self, id: &EntityId) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE entities SET sync_status = ? WHERE id = ?",
            params![SyncStatus::Conflict.as_str(), id.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!("entity {id}")));
        }
        Ok(())
    }

    fn set_remote_version(&self, id: &EntityId, remote_version: i64, base: &Value) -> Result<()> {
        self.conn.execute(
            "UPDATE entities
             SET remote_version = ?, base_payload = ?, local_version = MAX(local_version, ? + 1)
             WHERE id = ?",
            params![remote_version, json_text(base)?, remote_version, id.as_str()],
        )?;
        Ok(())
    }

    fn purge(&self, id: &EntityId) -> Result<()> {
        self.conn
            .execute("DELETE FROM entities WHERE id = ?", params![id.as_str()])?;
        Ok(())
    }

    fn count_by_status(&self, status: SyncStatus) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE sync_status = ?",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
