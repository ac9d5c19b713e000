//! Sync conflict model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::entity::EntityId;

/// How an open conflict was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Caller picked the remote value
    KeepRemote,
    /// Caller picked the local value
    KeepLocal,
    /// Caller supplied a different value
    Custom,
}

impl ResolutionStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepRemote => "keep_remote",
            Self::KeepLocal => "keep_local",
            Self::Custom => "custom",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "keep_remote" => Some(Self::KeepRemote),
            "keep_local" => Some(Self::KeepLocal),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// Divergent local and remote state that needs an explicit decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Frozen ledger record
    pub entity_id: EntityId,
    /// Local value when the conflict was detected (`null` for a local delete)
    pub local_value: Value,
    /// Remote value when the conflict was detected (`null` for a remote delete)
    pub remote_value: Value,
    /// Remote version the resolution will be rebased on
    pub remote_version: i64,
    /// Fields changed on both sides; empty for whole-record conflicts
    pub fields: Vec<String>,
    /// Detection timestamp (unix ms)
    pub detected_at: i64,
    pub resolution_strategy: Option<ResolutionStrategy>,
    pub resolved: bool,
    pub resolved_at: Option<i64>,
}
