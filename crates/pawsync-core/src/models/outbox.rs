//! Outbox entry model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity::{EntityId, EntityType};
use crate::error::Error;

/// Identifier of one outbox entry.
///
/// Sent with every push so the remote can deduplicate re-sent batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutboxEntryId(Uuid);

impl OutboxEntryId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OutboxEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OutboxEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OutboxEntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of mutation carried by an outbox entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Operation that replaces `self` when a newer mutation for the same
    /// entity arrives before `self` was sent.
    #[must_use]
    pub const fn coalesce(self, newer: Self) -> Self {
        match (self, newer) {
            (_, Self::Delete) => Self::Delete,
            (Self::Create, Self::Create | Self::Update) => Self::Create,
            (Self::Update | Self::Delete, Self::Create | Self::Update) => newer,
        }
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::Database(format!("unknown outbox operation '{other}'"))),
        }
    }
}

/// Delivery class. `Critical` always drains before `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    Critical,
}

impl Priority {
    /// Integer rank stored in `SQLite`; higher drains first.
    #[must_use]
    pub const fn rank(self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::Critical => 1,
        }
    }

    #[must_use]
    pub const fn from_rank(rank: i64) -> Self {
        if rank > 0 {
            Self::Critical
        } else {
            Self::Normal
        }
    }
}

/// A pending mutation intent awaiting transmission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxEntryId,
    pub entity_id: EntityId,
    pub entity_type: EntityType,
    pub operation: Operation,
    pub priority: Priority,
    /// Value at enqueue time; `null` for deletes
    pub payload_snapshot: Value,
    /// Serialized size of the snapshot, used for batch byte limits
    pub payload_bytes: i64,
    /// Ledger version the snapshot was taken at
    pub local_version: i64,
    /// FIFO position within a priority class
    pub sequence: i64,
    pub retry_count: u32,
    /// Earliest time (Unix ms) the entry may be sent again
    pub next_attempt_at: i64,
    /// Retries exhausted or rejected by the remote; not retried automatically
    pub permanent_failure: bool,
    pub last_error: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}
