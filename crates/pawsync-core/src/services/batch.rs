//! Atomic multi-record mutations.
//!
//! A batch is validated in full before anything is written; the writes then
//! run inside the caller's transaction so a failure leaves ledger and outbox
//! untouched.

use std::collections::HashMap;

use rusqlite::Connection;
use serde_json::Value;

use crate::db::{
    LedgerRepository, NewOutboxEntry, OutboxRepository, SqliteLedgerRepository,
    SqliteOutboxRepository, WriteMode,
};
use crate::error::{Error, Result};
use crate::models::{
    EntityId, EntityRecord, EntityType, Mutation, MutationOutcome, Operation, SyncStatus,
};

/// Ledger state of one entity as seen while simulating a batch
#[derive(Debug, Clone, Copy)]
struct Simulated {
    entity_type: EntityType,
    live: bool,
    conflicted: bool,
}

impl Simulated {
    const fn from_record(record: &EntityRecord) -> Self {
        Self {
            entity_type: record.entity_type,
            live: !record.is_deleted,
            conflicted: matches!(record.sync_status, SyncStatus::Conflict),
        }
    }
}

/// Check a payload against the per-type shape rules.
pub(crate) fn validate_payload(
    entity_type: EntityType,
    payload: &Value,
) -> std::result::Result<(), String> {
    let Some(fields) = payload.as_object() else {
        return Err("payload must be a JSON object".to_string());
    };

    let missing: Vec<&str> = entity_type
        .required_fields()
        .iter()
        .copied()
        .filter(|field| fields.get(*field).is_none_or(Value::is_null))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "{} requires field(s): {}",
            entity_type.as_str(),
            missing.join(", ")
        ))
    }
}

fn validate(ledger: &SqliteLedgerRepository<'_>, mutations: &[Mutation]) -> Result<()> {
    let mut seen: HashMap<EntityId, Option<Simulated>> = HashMap::new();

    for (index, mutation) in mutations.iter().enumerate() {
        let id = mutation.entity_id();
        let state = match seen.get(&id) {
            Some(state) => *state,
            None => ledger.find(&id)?.as_ref().map(Simulated::from_record),
        };

        if state.is_some_and(|state| state.conflicted) {
            return Err(Error::validation(
                index,
                format!("entity {id} has an unresolved conflict"),
            ));
        }

        let next = match mutation {
            Mutation::Upsert {
                entity_type,
                payload,
                ..
            } => {
                validate_payload(*entity_type, payload)
                    .map_err(|reason| Error::validation(index, reason))?;
                if let Some(state) = state.filter(|state| state.entity_type != *entity_type) {
                    return Err(Error::validation(
                        index,
                        format!(
                            "entity {id} is a {}, not a {}",
                            state.entity_type.as_str(),
                            entity_type.as_str()
                        ),
                    ));
                }
                Simulated {
                    entity_type: *entity_type,
                    live: true,
                    conflicted: false,
                }
            }
            Mutation::Delete { .. } => match state {
                Some(state) if state.live => Simulated {
                    live: false,
                    ..state
                },
                _ => {
                    return Err(Error::validation(index, format!("entity {id} does not exist")));
                }
            },
        };
        seen.insert(id, Some(next));
    }

    Ok(())
}

/// Validate then apply `mutations` on `conn`, which must be inside a transaction.
pub(crate) fn execute(
    conn: &Connection,
    mutations: &[Mutation],
    now: i64,
) -> Result<Vec<MutationOutcome>> {
    let ledger = SqliteLedgerRepository::new(conn);
    let outbox = SqliteOutboxRepository::new(conn);

    validate(&ledger, mutations)?;

    let mut outcomes = Vec::with_capacity(mutations.len());
    for mutation in mutations {
        let (stored, operation, priority, snapshot) = match mutation {
            Mutation::Upsert {
                id,
                entity_type,
                payload,
                priority,
            } => {
                let existing = ledger.find(id)?;
                let operation = if existing.as_ref().and_then(|r| r.remote_version).is_some() {
                    Operation::Update
                } else {
                    Operation::Create
                };
                let record = EntityRecord::with_id(*id, *entity_type, payload.clone());
                let stored = ledger.put(&record, WriteMode::Local)?;
                let priority = priority.unwrap_or_else(|| entity_type.default_priority());
                (stored, operation, priority, payload.clone())
            }
            Mutation::Delete { id } => {
                let mut tombstone = ledger
                    .find(id)?
                    .ok_or_else(|| Error::NotFound(format!("entity {id}")))?;
                if never_reached_remote(&outbox, &tombstone)? {
                    ledger.purge(id)?;
                    outbox.remove_for_entity(id)?;
                    outcomes.push(MutationOutcome {
                        entity_id: *id,
                        operation: Operation::Delete,
                        local_version: tombstone.local_version,
                        outbox_entry_id: None,
                    });
                    continue;
                }
                tombstone.is_deleted = true;
                let stored = ledger.put(&tombstone, WriteMode::Local)?;
                let priority = stored.entity_type.default_priority();
                (stored, Operation::Delete, priority, Value::Null)
            }
        };

        let entry = outbox.enqueue(
            NewOutboxEntry {
                entity_id: stored.id,
                entity_type: stored.entity_type,
                operation,
                priority,
                payload: snapshot,
                local_version: stored.local_version,
            },
            now,
        )?;

        outcomes.push(MutationOutcome {
            entity_id: stored.id,
            operation: entry.operation,
            local_version: stored.local_version,
            outbox_entry_id: Some(entry.id),
        });
    }

    tracing::debug!(mutations = outcomes.len(), "batch applied");
    Ok(outcomes)
}

/// Whether `record` exists only on this device. Any delivery attempt, even a
/// failed one, may have landed remotely.
fn never_reached_remote(
    outbox: &SqliteOutboxRepository<'_>,
    record: &EntityRecord,
) -> Result<bool> {
    if record.remote_version.is_some() || record.sync_status == SyncStatus::Syncing {
        return Ok(false);
    }
    Ok(outbox
        .find_by_entity(&record.id)?
        .is_none_or(|entry| entry.retry_count == 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_must_be_an_object() {
        assert!(validate_payload(EntityType::Contact, &json!(["x"])).is_err());
        assert!(validate_payload(EntityType::Contact, &Value::Null).is_err());
    }

    #[test]
    fn required_fields_must_be_present_and_non_null() {
        let error =
            validate_payload(EntityType::Pet, &json!({"name": "Rex", "species": null})).unwrap_err();
        assert_eq!(error, "pet requires field(s): species");

        let error = validate_payload(EntityType::LostReport, &json!({"pet_id": "p1"})).unwrap_err();
        assert_eq!(
            error,
            "lost-report requires field(s): last_seen_at, last_seen_location"
        );

        validate_payload(EntityType::Contact, &json!({"name": "Vet", "phone": "555"})).unwrap();
    }
}
