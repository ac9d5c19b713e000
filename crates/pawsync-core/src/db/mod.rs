//! Database layer for pawsync

mod conflict_repository;
mod connection;
mod ledger_repository;
mod migrations;
mod outbox_repository;
mod state_repository;

pub use conflict_repository::{ConflictRepository, NewConflict, SqliteConflictRepository};
pub use connection::Database;
pub use ledger_repository::{LedgerRepository, SqliteLedgerRepository, WriteMode};
pub use outbox_repository::{
    FailOutcome, NewOutboxEntry, OutboxRepository, SqliteOutboxRepository,
};
pub use state_repository::{SqliteStateRepository, StateRepository};

use std::str::FromStr;

/// Parse a TEXT column into a typed value, surfacing bad rows as conversion errors
pub(crate) fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(error))
    })
}

/// Serialize a JSON value for a TEXT column
pub(crate) fn json_text(value: &serde_json::Value) -> crate::Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Parse a JSON TEXT column
pub(crate) fn parse_json(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(error))
    })
}

/// Parse a nullable JSON TEXT column
pub(crate) fn parse_json_opt(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        serde_json::from_str(&raw).map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(error),
            )
        })
    })
    .transpose()
}
