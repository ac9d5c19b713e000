use std::path::Path;

use pawsync_core::models::{ResolutionStrategy, SyncConflict};
use serde_json::Value;

use crate::cli::ResolveChoice;
use crate::commands::common::{format_conflict_lines, open_store, parse_entity_id, parse_json};
use crate::error::CliError;

pub async fn run_conflicts(
    history: bool,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let conflicts = if history {
        store.conflict_history(limit).await?
    } else {
        store.list_conflicts().await?
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

/// Pick the value a resolution adopts.
pub fn chosen_value(conflict: &SyncConflict, choice: &ResolveChoice) -> Result<Value, CliError> {
    if choice.keep_local {
        Ok(conflict.local_value.clone())
    } else if choice.keep_remote {
        Ok(conflict.remote_value.clone())
    } else {
        choice.value.as_deref().map_or_else(
            || Err(CliError::InvalidPayload("no resolution chosen".to_string())),
            parse_json,
        )
    }
}

pub async fn run_resolve(
    id: &str,
    choice: &ResolveChoice,
    db_path: &Path,
) -> Result<ResolutionStrategy, CliError> {
    let id = parse_entity_id(id)?;
    let store = open_store(db_path)?;
    let conflict = store
        .list_conflicts()
        .await?
        .into_iter()
        .find(|conflict| conflict.entity_id == id)
        .ok_or_else(|| CliError::ConflictNotFound(id.to_string()))?;

    let chosen = chosen_value(&conflict, choice)?;
    let strategy = store.resolve_conflict(&id, chosen).await?;
    println!("{id} {}", strategy.as_str());
    Ok(strategy)
}
