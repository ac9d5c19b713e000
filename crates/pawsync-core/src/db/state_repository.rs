//! Sync cursor and session bookkeeping

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{SessionOutcome, SyncSession, SyncTrigger};
use rusqlite::{params, Connection, OptionalExtension};

const CURSOR_KEY: &str = "pull_cursor";
const LAST_SYNC_AT_KEY: &str = "last_sync_at";

/// Trait for sync state storage operations
pub trait StateRepository {
    /// Last acknowledged pull cursor
    fn cursor(&self) -> Result<Option<String>>;

    /// Advance the pull cursor
    fn set_cursor(&self, cursor: &str) -> Result<()>;

    /// Completion time (Unix ms) of the last clean sync cycle
    fn last_sync_at(&self) -> Result<Option<i64>>;

    fn set_last_sync_at(&self, at: i64) -> Result<()>;

    /// Insert or update a session row
    fn save_session(&self, session: &SyncSession) -> Result<()>;

    /// Most recent sessions, newest first
    fn recent_sessions(&self, limit: usize) -> Result<Vec<SyncSession>>;
}

/// `SQLite` implementation of `StateRepository`
pub struct SqliteStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM sync_state WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    fn parse_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncSession> {
        let trigger: String = row.get(1)?;
        let outcome: Option<String> = row.get(7)?;
        Ok(SyncSession {
            id: row.get(0)?,
            trigger: SyncTrigger::parse(&trigger),
            started_at: row.get(2)?,
            completed_at: row.get(3)?,
            pulled_count: row.get(4)?,
            pushed_count: row.get(5)?,
            failure_count: row.get(6)?,
            outcome: outcome.as_deref().and_then(SessionOutcome::parse),
        })
    }
}

impl StateRepository for SqliteStateRepository<'_> {
    fn cursor(&self) -> Result<Option<String>> {
        self.get_value(CURSOR_KEY)
    }

    fn set_cursor(&self, cursor: &str) -> Result<()> {
        self.set_value(CURSOR_KEY, cursor)
    }

    fn last_sync_at(&self) -> Result<Option<i64>> {
        Ok(self
            .get_value(LAST_SYNC_AT_KEY)?
            .and_then(|value| value.parse().ok()))
    }

    fn set_last_sync_at(&self, at: i64) -> Result<()> {
        self.set_value(LAST_SYNC_AT_KEY, &at.to_string())
    }

    fn save_session(&self, session: &SyncSession) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_sessions (id, trigger, started_at, completed_at,
                pulled_count, pushed_count, failure_count, outcome)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                session.id,
                session.trigger.as_str(),
                session.started_at,
                session.completed_at,
                session.pulled_count,
                session.pushed_count,
                session.failure_count,
                session.outcome.map(SessionOutcome::as_str),
            ],
        )?;
        Ok(())
    }

    fn recent_sessions(&self, limit: usize) -> Result<Vec<SyncSession>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, trigger, started_at, completed_at, pulled_count, pushed_count,
                    failure_count, outcome
             FROM sync_sessions
             ORDER BY started_at DESC, id DESC
             LIMIT ?",
        )?;
        let sessions = stmt
            .query_map(params![limit as i64], Self::parse_session)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_cursor_starts_empty_and_advances() {
        let db = setup();
        let repo = SqliteStateRepository::new(db.connection());

        assert_eq!(repo.cursor().unwrap(), None);
        repo.set_cursor("c1").unwrap();
        repo.set_cursor("c2").unwrap();
        assert_eq!(repo.cursor().unwrap().as_deref(), Some("c2"));
    }

    #[test]
    fn test_last_sync_at_roundtrip() {
        let db = setup();
        let repo = SqliteStateRepository::new(db.connection());

        assert_eq!(repo.last_sync_at().unwrap(), None);
        repo.set_last_sync_at(1_700_000_000_000).unwrap();
        assert_eq!(repo.last_sync_at().unwrap(), Some(1_700_000_000_000));
    }

    #[test]
    fn test_session_is_updated_in_place() {
        let db = setup();
        let repo = SqliteStateRepository::new(db.connection());

        let mut session = SyncSession::start(SyncTrigger::Timer);
        repo.save_session(&session).unwrap();

        session.pushed_count = 3;
        session.finish(SessionOutcome::Completed);
        repo.save_session(&session).unwrap();

        let sessions = repo.recent_sessions(10).unwrap();
        assert_eq!(sessions, vec![session]);
    }
}
