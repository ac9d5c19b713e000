//! Applying remote state to the local replica.
//!
//! Each function runs on a connection the caller has already put inside a
//! transaction: one remote change, one push batch result or one conflict
//! resolution is all-or-nothing.

use std::collections::HashMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::batch::validate_payload;
use crate::config::RetryPolicy;
use crate::db::{
    ConflictRepository, FailOutcome, LedgerRepository, NewConflict, NewOutboxEntry,
    OutboxRepository, SqliteConflictRepository, SqliteLedgerRepository, SqliteOutboxRepository,
    WriteMode,
};
use crate::error::{Error, Result};
use crate::models::{
    EntityId, EntityRecord, Operation, OutboxEntryId, ResolutionStrategy, SyncStatus,
};
use crate::remote::{PushItem, PushResult, PushStatus, RemoteChange, RemoteError};
use crate::sync::resolver::{resolve, Resolution};

/// What merging one remote change did to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Remote state adopted (inserted, replaced or deleted)
    Applied,
    /// Local edits kept; they will be pushed
    KeptLocal,
    /// Independent edits combined and re-queued for push
    FieldMerged,
    /// Frozen behind a conflict record
    Conflicted,
    /// Nothing to do (deletion of an unknown record)
    Skipped,
}

/// Per-batch push accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushTally {
    pub applied: u32,
    pub rejected: u32,
    pub retrying: u32,
    pub exhausted: u32,
}

impl PushTally {
    pub const fn failures(&self) -> u32 {
        self.rejected + self.retrying + self.exhausted
    }
}

pub(crate) fn merge_remote(conn: &Connection, change: &RemoteChange, now: i64) -> Result<MergeOutcome> {
    let ledger = SqliteLedgerRepository::new(conn);
    let outbox = SqliteOutboxRepository::new(conn);
    let conflicts = SqliteConflictRepository::new(conn);

    let Some(local) = ledger.find(&change.id)? else {
        let Some(payload) = change.payload.clone() else {
            return Ok(MergeOutcome::Skipped);
        };
        let mut record = EntityRecord::with_id(change.id, change.entity_type, payload);
        record.created_at = change.created_at;
        ledger.put(
            &record,
            WriteMode::Merged {
                remote_version: change.version,
            },
        )?;
        return Ok(MergeOutcome::Applied);
    };

    if local.sync_status == SyncStatus::Conflict {
        // Frozen: only refresh the remote side of the open conflict.
        if let Some(open) = conflicts.find_open(&change.id)? {
            if change.version > open.remote_version {
                conflicts.open(
                    &NewConflict {
                        entity_id: change.id,
                        local_value: open.local_value,
                        remote_value: change.visible_payload(),
                        remote_version: change.version,
                        fields: open.fields,
                    },
                    now,
                )?;
            }
        }
        return Ok(MergeOutcome::Conflicted);
    }

    let resolution = resolve(&local, change);
    tracing::debug!(entity_id = %change.id, version = change.version, ?resolution, "merge decision");

    match resolution {
        Resolution::RemoteWins => {
            adopt_remote(&ledger, &local, change)?;
            outbox.remove_for_entity(&change.id)?;
            Ok(MergeOutcome::Applied)
        }
        Resolution::LocalWins => {
            if local.remote_version.is_none_or(|known| change.version > known) {
                ledger.set_remote_version(&change.id, change.version, &change.visible_payload())?;
            }
            if outbox.find_by_entity(&change.id)?.is_none() {
                let stored = ledger
                    .find(&change.id)?
                    .ok_or_else(|| Error::NotFound(format!("entity {}", change.id)))?;
                requeue_local(&outbox, &stored, change.is_deleted(), now)?;
            }
            Ok(MergeOutcome::KeptLocal)
        }
        Resolution::FieldMerge { merged } => {
            let mut record = local.clone();
            record.payload = merged;
            let stored = ledger.put(
                &record,
                WriteMode::Rebased {
                    remote_version: change.version,
                    base: change.visible_payload(),
                },
            )?;
            outbox.enqueue(
                NewOutboxEntry {
                    entity_id: stored.id,
                    entity_type: stored.entity_type,
                    operation: Operation::Update,
                    priority: stored.entity_type.default_priority(),
                    payload: stored.payload.clone(),
                    local_version: stored.local_version,
                },
                now,
            )?;
            Ok(MergeOutcome::FieldMerged)
        }
        Resolution::ManualRequired { fields } => {
            conflicts.open(
                &NewConflict {
                    entity_id: change.id,
                    local_value: local.visible_payload(),
                    remote_value: change.visible_payload(),
                    remote_version: change.version,
                    fields,
                },
                now,
            )?;
            ledger.mark_conflict(&change.id)?;
            Ok(MergeOutcome::Conflicted)
        }
    }
}

fn adopt_remote(
    ledger: &SqliteLedgerRepository<'_>,
    local: &EntityRecord,
    change: &RemoteChange,
) -> Result<()> {
    match &change.payload {
        Some(payload) => {
            let mut record = local.clone();
            record.entity_type = change.entity_type;
            record.payload = payload.clone();
            record.is_deleted = false;
            ledger.put(
                &record,
                WriteMode::Merged {
                    remote_version: change.version,
                },
            )?;
            Ok(())
        }
        None => ledger.purge(&change.id),
    }
}

/// Re-enqueue a record's current local state; the remote moved on without it.
fn requeue_local(
    outbox: &SqliteOutboxRepository<'_>,
    record: &EntityRecord,
    remote_deleted: bool,
    now: i64,
) -> Result<()> {
    let (operation, payload) = if record.is_deleted {
        (Operation::Delete, Value::Null)
    } else if remote_deleted {
        (Operation::Create, record.payload.clone())
    } else {
        (Operation::Update, record.payload.clone())
    };
    outbox.enqueue(
        NewOutboxEntry {
            entity_id: record.id,
            entity_type: record.entity_type,
            operation,
            priority: record.entity_type.default_priority(),
            payload,
            local_version: record.local_version,
        },
        now,
    )?;
    Ok(())
}

/// Dequeue a push batch and move its records to `Syncing`.
pub(crate) fn prepare_push(
    conn: &Connection,
    max_items: usize,
    max_bytes: usize,
    now: i64,
) -> Result<Vec<PushItem>> {
    let ledger = SqliteLedgerRepository::new(conn);
    let outbox = SqliteOutboxRepository::new(conn);

    let entries = outbox.dequeue_batch(max_items, max_bytes, now)?;
    let ids: Vec<EntityId> = entries.iter().map(|entry| entry.entity_id).collect();
    ledger.mark_syncing(&ids)?;

    entries
        .iter()
        .map(|entry| {
            let base_version = ledger
                .find(&entry.entity_id)?
                .and_then(|record| record.remote_version);
            Ok(PushItem::from_entry(entry, base_version))
        })
        .collect()
}

/// Settle a pushed batch against the remote's per-item verdicts.
pub(crate) fn record_push_results(
    conn: &Connection,
    items: &[PushItem],
    results: Vec<PushResult>,
    policy: &RetryPolicy,
    now: i64,
) -> Result<PushTally> {
    let ledger = SqliteLedgerRepository::new(conn);
    let outbox = SqliteOutboxRepository::new(conn);
    let mut verdicts: HashMap<OutboxEntryId, PushStatus> = results
        .into_iter()
        .map(|result| (result.entry_id, result.status))
        .collect();
    let mut tally = PushTally::default();

    for item in items {
        let status = verdicts.remove(&item.entry_id).unwrap_or_else(|| PushStatus::Retry {
            reason: "no result returned for entry".to_string(),
        });

        match status {
            PushStatus::Applied { version } => {
                tally.applied += 1;
                if outbox.ack(&item.entry_id)? {
                    if ledger.find(&item.entity_id)?.is_some() {
                        ledger.mark_synced(&item.entity_id, version)?;
                    }
                } else if outbox.find_by_entity(&item.entity_id)?.is_some() {
                    // Superseded mid-flight: remember the remote version, keep the newer edit.
                    let base = item.payload.clone().unwrap_or(Value::Null);
                    ledger.set_remote_version(&item.entity_id, version, &base)?;
                }
            }
            PushStatus::Rejected { reason } => {
                tally.rejected += 1;
                tracing::warn!(entity_id = %item.entity_id, %reason, "remote rejected mutation");
                if outbox.get(&item.entry_id)?.is_some() {
                    outbox.mark_permanent(&item.entry_id, &reason)?;
                }
                ledger.mark_pending(&[item.entity_id])?;
            }
            PushStatus::Retry { reason } => {
                match outbox.fail(&item.entry_id, now, policy, &reason)? {
                    FailOutcome::Exhausted { .. } => tally.exhausted += 1,
                    FailOutcome::Retrying { .. } | FailOutcome::Gone => tally.retrying += 1,
                }
                ledger.mark_pending(&[item.entity_id])?;
            }
        }
    }

    Ok(tally)
}

/// A whole push batch failed. Transient errors back every entry off; a
/// permanent rejection flags every entry for the caller instead.
pub(crate) fn fail_push(
    conn: &Connection,
    items: &[PushItem],
    error: &RemoteError,
    policy: &RetryPolicy,
    now: i64,
) -> Result<PushTally> {
    let reason = error.to_string();
    let results = items
        .iter()
        .map(|item| PushResult {
            entry_id: item.entry_id,
            status: if error.is_transient() {
                PushStatus::Retry {
                    reason: reason.clone(),
                }
            } else {
                PushStatus::Rejected {
                    reason: reason.clone(),
                }
            },
        })
        .collect();
    record_push_results(conn, items, results, policy, now)
}

/// Return a batch that was never delivered (cancelled) to `Pending`.
pub(crate) fn release_push(conn: &Connection, items: &[PushItem]) -> Result<()> {
    let ids: Vec<EntityId> = items.iter().map(|item| item.entity_id).collect();
    SqliteLedgerRepository::new(conn).mark_pending(&ids)
}

/// Close the open conflict for `entity_id` by adopting `chosen`.
///
/// Choosing the remote value settles the record at the remote version. Any
/// other value (the local one, a hand-merged one, or `null` to delete) is
/// rebased on the remote version and queued for push.
pub(crate) fn resolve_conflict(
    conn: &Connection,
    entity_id: &EntityId,
    chosen: Value,
    now: i64,
) -> Result<ResolutionStrategy> {
    let ledger = SqliteLedgerRepository::new(conn);
    let outbox = SqliteOutboxRepository::new(conn);
    let conflicts = SqliteConflictRepository::new(conn);

    let conflict = conflicts
        .find_open(entity_id)?
        .ok_or_else(|| Error::NotFound(format!("open conflict for {entity_id}")))?;
    let local = ledger
        .find(entity_id)?
        .ok_or_else(|| Error::NotFound(format!("entity {entity_id}")))?;

    let strategy = if chosen == conflict.remote_value {
        if chosen.is_null() {
            ledger.purge(entity_id)?;
        } else {
            let mut record = local;
            record.payload = chosen;
            record.is_deleted = false;
            ledger.put(
                &record,
                WriteMode::Merged {
                    remote_version: conflict.remote_version,
                },
            )?;
        }
        outbox.remove_for_entity(entity_id)?;
        ResolutionStrategy::KeepRemote
    } else {
        if !chosen.is_null() {
            validate_payload(local.entity_type, &chosen).map_err(Error::InvalidInput)?;
        }

        let strategy = if chosen == conflict.local_value {
            ResolutionStrategy::KeepLocal
        } else {
            ResolutionStrategy::Custom
        };

        let mut record = local;
        record.is_deleted = chosen.is_null();
        if !record.is_deleted {
            record.payload = chosen;
        }
        let stored = ledger.put(
            &record,
            WriteMode::Rebased {
                remote_version: conflict.remote_version,
                base: conflict.remote_value.clone(),
            },
        )?;
        requeue_local(&outbox, &stored, conflict.remote_value.is_null(), now)?;
        strategy
    };

    conflicts.resolve(entity_id, strategy, now)?;
    tracing::info!(%entity_id, strategy = strategy.as_str(), "conflict resolved");
    Ok(strategy)
}
