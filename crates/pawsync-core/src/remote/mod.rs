//! Remote boundary: the authoritative store the engine synchronizes against.
//!
//! The engine only sees [`RemoteBoundary`]; [`HttpRemote`] is the JSON-over-HTTP
//! implementation. Both calls must be idempotent on retry: push items carry the
//! client-generated outbox entry id so a re-sent batch never duplicates writes.

mod http;

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{EntityId, EntityType, Operation, OutboxEntry, OutboxEntryId};

pub use http::HttpRemote;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Network trouble, timeouts, 5xx, rate limiting; retried with backoff
    #[error("Transient remote error: {0}")]
    Transient(String),
    /// The remote refused the request outright; not retried
    #[error("Remote rejected request: {0}")]
    Permanent(String),
}

impl RemoteError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// One remote record version returned by a pull
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChange {
    pub id: EntityId,
    pub entity_type: EntityType,
    /// `None` when the record was deleted remotely
    #[serde(default)]
    pub payload: Option<Value>,
    /// Monotonic per-record version assigned by the remote
    pub version: i64,
    /// Unix ms
    pub created_at: i64,
    /// Unix ms
    pub updated_at: i64,
}

impl RemoteChange {
    pub const fn is_deleted(&self) -> bool {
        self.payload.is_none()
    }

    /// Payload as seen by the conflict resolver (`null` for deletions)
    pub fn visible_payload(&self) -> Value {
        self.payload.clone().unwrap_or(Value::Null)
    }
}

/// One page of remote changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    pub changes: Vec<RemoteChange>,
    /// Cursor to persist once every change in this page is merged
    pub cursor: String,
    /// More pages are available after `cursor`
    #[serde(default)]
    pub has_more: bool,
}

/// One outbox entry as sent to the remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushItem {
    /// Idempotency key
    pub entry_id: OutboxEntryId,
    pub entity_id: EntityId,
    pub entity_type: EntityType,
    pub operation: Operation,
    /// `None` for deletes
    pub payload: Option<Value>,
    /// Remote version the change was based on, `None` for never-synced records
    pub base_version: Option<i64>,
}

impl PushItem {
    pub fn from_entry(entry: &OutboxEntry, base_version: Option<i64>) -> Self {
        Self {
            entry_id: entry.id,
            entity_id: entry.entity_id,
            entity_type: entry.entity_type,
            operation: entry.operation,
            payload: (entry.operation != Operation::Delete).then(|| entry.payload_snapshot.clone()),
            base_version,
        }
    }
}

/// Per-item push verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PushStatus {
    /// Applied at the given remote version
    Applied { version: i64 },
    /// Refused for good (validation, authorization, ...)
    Rejected { reason: String },
    /// Not applied this time; try again later
    Retry { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResult {
    pub entry_id: OutboxEntryId,
    #[serde(flatten)]
    pub status: PushStatus,
}

/// Request/response boundary to the authoritative store
pub trait RemoteBoundary: Send + Sync + 'static {
    /// Fetch changes after `cursor` (`None` = from the beginning)
    fn pull(&self, cursor: Option<String>)
        -> impl Future<Output = RemoteResult<PullResponse>> + Send;

    /// Apply a batch of outbox entries
    fn push(&self, items: Vec<PushItem>)
        -> impl Future<Output = RemoteResult<Vec<PushResult>>> + Send;
}
