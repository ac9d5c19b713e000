//! Caller-issued ledger mutations

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::entity::{EntityId, EntityType};
use super::outbox::{Operation, OutboxEntryId, Priority};

/// One write in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    /// Create the entity if unknown, otherwise replace its payload
    Upsert {
        id: EntityId,
        entity_type: EntityType,
        payload: Value,
        /// Overrides the entity type's default outbox priority
        #[serde(default)]
        priority: Option<Priority>,
    },
    /// Tombstone the entity until the remote acknowledges the delete
    Delete { id: EntityId },
}

impl Mutation {
    /// Upsert of a brand new entity with a fresh client-generated id
    #[must_use]
    pub fn create(entity_type: EntityType, payload: Value) -> Self {
        Self::upsert(EntityId::new(), entity_type, payload)
    }

    #[must_use]
    pub const fn upsert(id: EntityId, entity_type: EntityType, payload: Value) -> Self {
        Self::Upsert {
            id,
            entity_type,
            payload,
            priority: None,
        }
    }

    #[must_use]
    pub const fn delete(id: EntityId) -> Self {
        Self::Delete { id }
    }

    #[must_use]
    pub const fn entity_id(&self) -> EntityId {
        match self {
            Self::Upsert { id, .. } | Self::Delete { id } => *id,
        }
    }
}

/// Result of one applied mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationOutcome {
    pub entity_id: EntityId,
    pub operation: Operation,
    pub local_version: i64,
    /// `None` when a delete removed a record the remote never saw
    pub outbox_entry_id: Option<OutboxEntryId>,
}
