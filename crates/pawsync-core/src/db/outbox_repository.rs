//! Priority outbox of pending local mutations

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for counts and sizes

use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::models::{
    EntityId, EntityType, Operation, OutboxEntry, OutboxEntryId, Priority, SyncStatus,
};
use crate::util::duration_millis;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{json_text, parse_column, parse_json};

/// A mutation intent about to be enqueued
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEntry {
    pub entity_id: EntityId,
    pub entity_type: EntityType,
    pub operation: Operation,
    pub priority: Priority,
    pub payload: Value,
    pub local_version: i64,
}

/// What `fail` decided for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled for another attempt
    Retrying {
        retry_count: u32,
        next_attempt_at: i64,
    },
    /// Retries exhausted; surfaced instead of retried
    Exhausted { retry_count: u32 },
    /// The entry was acked or superseded in the meantime
    Gone,
}

/// Trait for outbox storage operations
pub trait OutboxRepository {
    /// Enqueue a mutation, coalescing with any open entry for the same entity
    fn enqueue(&self, entry: NewOutboxEntry, now: i64) -> Result<OutboxEntry>;

    /// Eligible entries, Critical first then FIFO, within item and byte limits
    fn dequeue_batch(&self, max_items: usize, max_bytes: usize, now: i64)
        -> Result<Vec<OutboxEntry>>;

    /// Remove an entry after a confirmed remote apply; `false` if already gone
    fn ack(&self, id: &OutboxEntryId) -> Result<bool>;

    /// Record a transient failure and schedule the next attempt
    fn fail(&self, id: &OutboxEntryId, now: i64, policy: &RetryPolicy, error: &str)
        -> Result<FailOutcome>;

    /// Flag an entry as permanently failed (remote rejection)
    fn mark_permanent(&self, id: &OutboxEntryId, reason: &str) -> Result<()>;

    /// Make all permanently failed entries eligible again
    fn requeue_failed(&self, now: i64) -> Result<usize>;

    /// Get an entry by ID
    fn get(&self, id: &OutboxEntryId) -> Result<Option<OutboxEntry>>;

    /// Get the open entry for an entity
    fn find_by_entity(&self, entity_id: &EntityId) -> Result<Option<OutboxEntry>>;

    /// Drop the open entry for an entity, if any
    fn remove_for_entity(&self, entity_id: &EntityId) -> Result<()>;

    /// All entries in drain order
    fn list(&self) -> Result<Vec<OutboxEntry>>;

    /// Entries still awaiting delivery (not permanently failed)
    fn count_pending(&self) -> Result<usize>;

    /// Entries surfaced as permanent failures
    fn count_failed(&self) -> Result<usize>;
}

/// `SQLite` implementation of `OutboxRepository`
pub struct SqliteOutboxRepository<'a> {
    conn: &'a Connection,
}

const ENTRY_COLUMNS: &str = "o.id, o.entity_id, o.entity_type, o.operation, o.priority, o.payload,
     o.payload_bytes, o.local_version, o.sequence, o.retry_count, o.next_attempt_at,
     o.permanent_failure, o.last_error, o.created_at";

impl<'a> SqliteOutboxRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an entry from a database row
    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEntry> {
        Ok(OutboxEntry {
            id: parse_column(row, 0)?,
            entity_id: parse_column(row, 1)?,
            entity_type: parse_column(row, 2)?,
            operation: parse_column(row, 3)?,
            priority: Priority::from_rank(row.get(4)?),
            payload_snapshot: parse_json(row, 5)?,
            payload_bytes: row.get(6)?,
            local_version: row.get(7)?,
            sequence: row.get(8)?,
            retry_count: row.get(9)?,
            next_attempt_at: row.get(10)?,
            permanent_failure: row.get::<_, i32>(11)? != 0,
            last_error: row.get(12)?,
            created_at: row.get(13)?,
        })
    }

    fn next_sequence(&self) -> Result<i64> {
        let sequence = self
            .conn
            .query_row("SELECT COALESCE(MAX(sequence), 0) + 1 FROM outbox", [], |row| {
                row.get(0)
            })?;
        Ok(sequence)
    }

    fn count_where(&self, permanent_failure: bool) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE permanent_failure = ?",
            params![i32::from(permanent_failure)],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

impl OutboxRepository for SqliteOutboxRepository<'_> {
    fn enqueue(&self, entry: NewOutboxEntry, now: i64) -> Result<OutboxEntry> {
        let existing = self.find_by_entity(&entry.entity_id)?;

        let (operation, priority, sequence, created_at) = match &existing {
            Some(open) => (
                open.operation.coalesce(entry.operation),
                open.priority.max(entry.priority),
                open.sequence,
                open.created_at,
            ),
            None => (entry.operation, entry.priority, self.next_sequence()?, now),
        };

        if let Some(open) = &existing {
            self.conn
                .execute("DELETE FROM outbox WHERE id = ?", params![open.id.as_str()])?;
        }

        let payload = json_text(&entry.payload)?;
        let stored = OutboxEntry {
            id: OutboxEntryId::new(),
            entity_id: entry.entity_id,
            entity_type: entry.entity_type,
            operation,
            priority,
            payload_bytes: payload.len() as i64,
            payload_snapshot: entry.payload,
            local_version: entry.local_version,
            sequence,
            retry_count: 0,
            next_attempt_at: now,
            permanent_failure: false,
            last_error: None,
            created_at,
        };

        self.conn.execute(
            "INSERT INTO outbox (id, entity_id, entity_type, operation, priority, payload,
                payload_bytes, local_version, sequence, retry_count, next_attempt_at,
                permanent_failure, last_error, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, 0, NULL, ?)",
            params![
                stored.id.as_str(),
                stored.entity_id.as_str(),
                stored.entity_type.as_str(),
                stored.operation.as_str(),
                stored.priority.rank(),
                payload,
                stored.payload_bytes,
                stored.local_version,
                stored.sequence,
                stored.next_attempt_at,
                stored.created_at,
            ],
        )?;

        tracing::debug!(
            entity_id = %stored.entity_id,
            operation = stored.operation.as_str(),
            coalesced = existing.is_some(),
            "outbox enqueue"
        );
        Ok(stored)
    }

    fn dequeue_batch(
        &self,
        max_items: usize,
        max_bytes: usize,
        now: i64,
    ) -> Result<Vec<OutboxEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM outbox o
             LEFT JOIN entities e ON e.id = o.entity_id
             WHERE o.permanent_failure = 0
               AND o.next_attempt_at <= ?
               AND (e.sync_status IS NULL OR e.sync_status != ?)
             ORDER BY o.priority DESC, o.sequence ASC"
        ))?;

        let mut rows = stmt.query(params![now, SyncStatus::Conflict.as_str()])?;
        let mut batch = Vec::new();
        let mut bytes = 0_usize;

        while let Some(row) = rows.next()? {
            if batch.len() >= max_items {
                break;
            }
            let entry = Self::parse_entry(row)?;
            let size = usize::try_from(entry.payload_bytes).unwrap_or_default();
            // An oversized head entry still goes out alone so it cannot starve.
            if !batch.is_empty() && bytes + size > max_bytes {
                break;
            }
            bytes += size;
            batch.push(entry);
        }

        Ok(batch)
    }

    fn ack(&self, id: &OutboxEntryId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM outbox WHERE id = ?", params![id.as_str()])?;
        Ok(rows > 0)
    }

    fn fail(
        &self,
        id: &OutboxEntryId,
        now: i64,
        policy: &RetryPolicy,
        error: &str,
    ) -> Result<FailOutcome> {
        let Some(entry) = self.get(id)? else {
            return Ok(FailOutcome::Gone);
        };

        let retry_count = entry.retry_count.saturating_add(1);
        if policy.is_exhausted(retry_count) {
            self.conn.execute(
                "UPDATE outbox SET retry_count = ?, permanent_failure = 1, last_error = ? WHERE id = ?",
                params![retry_count, error, id.as_str()],
            )?;
            tracing::warn!(entity_id = %entry.entity_id, retry_count, "outbox entry exhausted retries");
            return Ok(FailOutcome::Exhausted { retry_count });
        }

        let next_attempt_at = now.saturating_add(duration_millis(policy.delay_for(retry_count)));
        self.conn.execute(
            "UPDATE outbox SET retry_count = ?, next_attempt_at = ?, last_error = ? WHERE id = ?",
            params![retry_count, next_attempt_at, error, id.as_str()],
        )?;
        Ok(FailOutcome::Retrying {
            retry_count,
            next_attempt_at,
        })
    }

    fn mark_permanent(&self, id: &OutboxEntryId, reason: &str) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE outbox SET permanent_failure = 1, last_error = ? WHERE id = ?",
            params![reason, id.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!("outbox entry {id}")));
        }
        Ok(())
    }

    fn requeue_failed(&self, now: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE outbox
             SET permanent_failure = 0, retry_count = 0, next_attempt_at = ?, last_error = NULL
             WHERE permanent_failure = 1",
            params![now],
        )?;
        Ok(rows)
    }

    fn get(&self, id: &OutboxEntryId) -> Result<Option<OutboxEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM outbox o WHERE o.id = ?"),
                params![id.as_str()],
                Self::parse_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn find_by_entity(&self, entity_id: &EntityId) -> Result<Option<OutboxEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM outbox o WHERE o.entity_id = ?"),
                params![entity_id.as_str()],
                Self::parse_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn remove_for_entity(&self, entity_id: &EntityId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM outbox WHERE entity_id = ?",
            params![entity_id.as_str()],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<OutboxEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM outbox o ORDER BY o.priority DESC, o.sequence ASC"
        ))?;
        let entries = stmt
            .query_map([], Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn count_pending(&self) -> Result<usize> {
        self.count_where(false)
    }

    fn count_failed(&self) -> Result<usize> {
        self.count_where(true)
    }
}
