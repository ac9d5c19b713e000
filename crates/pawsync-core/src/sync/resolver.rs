//! Conflict resolution between a ledger record and an incoming remote version.
//!
//! [`resolve`] is pure: it reads both sides and returns a decision, it never
//! touches storage. Field-level decisions work on the top-level keys of JSON
//! object payloads, diffed against the record's `base_payload` (the remote
//! state the local edits started from).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::EntityRecord;
use crate::remote::RemoteChange;

/// Decision for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// Adopt the remote payload; local has nothing unsynced worth keeping
    RemoteWins,
    /// Keep the local payload and push it as-is
    LocalWins,
    /// Independent field edits on both sides, combined
    FieldMerge { merged: Value },
    /// Both sides changed the same data; a caller must decide
    ManualRequired { fields: Vec<String> },
}

/// Decide how `remote` should be reconciled with `local`.
pub fn resolve(local: &EntityRecord, remote: &RemoteChange) -> Resolution {
    if !local.has_unsynced_changes() {
        return Resolution::RemoteWins;
    }

    let local_value = local.visible_payload();
    let remote_value = remote.visible_payload();
    if local_value == remote_value {
        return Resolution::RemoteWins;
    }

    let Some(known_version) = local.remote_version else {
        // Concurrent creates: no version to compare, oldest record wins.
        return if local.created_at < remote.created_at {
            Resolution::LocalWins
        } else {
            Resolution::RemoteWins
        };
    };

    if remote.version <= known_version {
        return Resolution::LocalWins;
    }

    let (Some(base), Some(local_fields), Some(remote_fields)) = (
        local.base_payload.as_ref().and_then(Value::as_object),
        local_value.as_object(),
        remote_value.as_object(),
    ) else {
        return Resolution::ManualRequired { fields: Vec::new() };
    };

    let local_changes = diff_fields(base, local_fields);
    let remote_changes = diff_fields(base, remote_fields);

    if local_changes.is_empty() {
        return Resolution::RemoteWins;
    }
    if remote_changes.is_empty() {
        return Resolution::LocalWins;
    }

    let overlapping: Vec<String> = local_changes
        .iter()
        .filter(|(field, value)| {
            remote_changes
                .get(*field)
                .is_some_and(|remote_value| remote_value != *value)
        })
        .map(|(field, _)| field.clone())
        .collect();

    if !overlapping.is_empty() {
        return Resolution::ManualRequired {
            fields: overlapping,
        };
    }

    let mut merged = base.clone();
    apply_changes(&mut merged, remote_changes);
    apply_changes(&mut merged, local_changes);
    Resolution::FieldMerge {
        merged: Value::Object(merged),
    }
}

/// Fields whose value differs from `base`; `None` marks a removed field.
fn diff_fields(
    base: &Map<String, Value>,
    current: &Map<String, Value>,
) -> BTreeMap<String, Option<Value>> {
    let keys: BTreeSet<&String> = base.keys().chain(current.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let before = base.get(key);
            let after = current.get(key);
            (before != after).then(|| (key.clone(), after.cloned()))
        })
        .collect()
}

fn apply_changes(target: &mut Map<String, Value>, changes: BTreeMap<String, Option<Value>>) {
    for (field, value) in changes {
        match value {
            Some(value) => {
                target.insert(field, value);
            }
            None => {
                target.remove(&field);
            }
        }
    }
}
