//! Entity record model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::outbox::Priority;
use crate::error::Error;

/// A unique identifier for an entity, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Create a new client-generated entity ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Discriminator for the kind of domain object a record holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    Pet,
    HealthRecord,
    LostReport,
    Contact,
}

impl EntityType {
    pub const ALL: [Self; 4] = [
        Self::Pet,
        Self::HealthRecord,
        Self::LostReport,
        Self::Contact,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pet => "pet",
            Self::HealthRecord => "health-record",
            Self::LostReport => "lost-report",
            Self::Contact => "contact",
        }
    }

    /// Outbox priority used when the caller does not override it.
    ///
    /// Lost-pet reports are safety alerts and always jump the queue.
    #[must_use]
    pub const fn default_priority(self) -> Priority {
        match self {
            Self::LostReport => Priority::Critical,
            Self::Pet | Self::HealthRecord | Self::Contact => Priority::Normal,
        }
    }

    /// Top-level payload fields that must be present and non-null.
    #[must_use]
    pub const fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Pet => &["name", "species"],
            Self::HealthRecord => &["pet_id", "kind", "recorded_at"],
            Self::LostReport => &["pet_id", "last_seen_at", "last_seen_location"],
            Self::Contact => &["name"],
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown entity type '{s}'")))
    }
}

/// Sync lifecycle of a ledger record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local changes not yet acknowledged by the remote
    Pending,
    /// Included in a push that has not completed
    Syncing,
    /// Local and remote agree
    Synced,
    /// Frozen until an open conflict is resolved
    Conflict,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "conflict" => Ok(Self::Conflict),
            other => Err(Error::Database(format!("unknown sync status '{other}'"))),
        }
    }
}

/// One logical domain object plus its sync metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Stable client-generated identifier
    pub id: EntityId,
    /// Kind of domain object
    pub entity_type: EntityType,
    /// Type-specific structured value
    pub payload: Value,
    /// Remote payload as of the last acknowledged sync (merge ancestor)
    pub base_payload: Option<Value>,
    /// Bumped on every local mutation
    pub local_version: i64,
    /// Last version acknowledged by the remote, `None` if never synced
    pub remote_version: Option<i64>,
    pub sync_status: SyncStatus,
    /// Local tombstone awaiting an acknowledged delete
    pub is_deleted: bool,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl EntityRecord {
    /// Create a new, never-synced record
    #[must_use]
    pub fn new(entity_type: EntityType, payload: Value) -> Self {
        Self::with_id(EntityId::new(), entity_type, payload)
    }

    /// Create a new record with a caller-chosen id
    #[must_use]
    pub fn with_id(id: EntityId, entity_type: EntityType, payload: Value) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id,
            entity_type,
            payload,
            base_payload: None,
            local_version: 0,
            remote_version: None,
            sync_status: SyncStatus::Pending,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the local copy carries edits the remote has not acknowledged
    #[must_use]
    pub fn has_unsynced_changes(&self) -> bool {
        self.remote_version != Some(self.local_version)
    }

    /// Next local version after a mutation
    #[must_use]
    pub fn next_local_version(&self) -> i64 {
        self.local_version.max(self.remote_version.unwrap_or(0)) + 1
    }

    /// Payload as seen by the conflict resolver (`null` for tombstones)
    #[must_use]
    pub fn visible_payload(&self) -> Value {
        if self.is_deleted {
            Value::Null
        } else {
            self.payload.clone()
        }
    }
}
