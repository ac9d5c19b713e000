use std::path::Path;

use crate::commands::common::{format_outbox_lines, open_store, outbox_to_item, OutboxItem};
use crate::error::CliError;

pub async fn run_outbox(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let entries = store.outbox_entries().await?;

    if as_json {
        let items = entries.iter().map(outbox_to_item).collect::<Vec<OutboxItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Outbox is empty.");
        return Ok(());
    }

    for line in format_outbox_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}
