use std::path::Path;

use pawsync_core::models::Priority;
use pawsync_core::util::now_millis;
use pawsync_core::{EntityId, Mutation};

use crate::commands::common::{
    format_record_lines, open_store, parse_entity_id, parse_entity_type, parse_json,
    record_to_item, RecordItem,
};
use crate::error::CliError;

pub async fn run_put(
    entity_type: &str,
    payload: &str,
    id: Option<&str>,
    critical: bool,
    db_path: &Path,
) -> Result<EntityId, CliError> {
    let entity_type = parse_entity_type(entity_type)?;
    let payload = parse_json(payload)?;
    let id = id.map(parse_entity_id).transpose()?.unwrap_or_default();

    let store = open_store(db_path)?;
    let mutation = Mutation::Upsert {
        id,
        entity_type,
        payload,
        priority: critical.then_some(Priority::Critical),
    };
    let outcomes = store.apply_batch(std::slice::from_ref(&mutation)).await?;
    for outcome in &outcomes {
        println!("{}", outcome.entity_id);
    }
    Ok(id)
}

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let id = parse_entity_id(id)?;
    let store = open_store(db_path)?;
    if store.get(&id).await?.is_none() {
        return Err(CliError::RecordNotFound(id.to_string()));
    }

    store.apply_batch(&[Mutation::delete(id)]).await?;
    println!("{id}");
    Ok(())
}

pub async fn run_get(id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let id = parse_entity_id(id)?;
    let store = open_store(db_path)?;
    let record = store
        .get(&id)
        .await?
        .ok_or_else(|| CliError::RecordNotFound(id.to_string()))?;

    if as_json {
        let item = record_to_item(&record, now_millis());
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        println!("{} {} [{}]", record.id, record.entity_type, record.sync_status.as_str());
        println!("{}", serde_json::to_string_pretty(&record.payload)?);
    }
    Ok(())
}

pub async fn run_list(entity_type: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let entity_type = parse_entity_type(entity_type)?;
    let store = open_store(db_path)?;
    let records = store.list_by_type(entity_type).await?;
    let now = now_millis();

    if as_json {
        let items = records
            .iter()
            .map(|record| record_to_item(record, now))
            .collect::<Vec<RecordItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for line in format_record_lines(&records, now) {
            println!("{line}");
        }
    }
    Ok(())
}
