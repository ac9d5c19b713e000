use std::path::Path;

use crate::commands::common::{format_session_lines, open_store};
use crate::error::CliError;

pub async fn run_sessions(limit: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let sessions = store.recent_sessions(limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sync sessions recorded.");
        return Ok(());
    }

    for line in format_session_lines(&sessions) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_requeue(db_path: &Path) -> Result<usize, CliError> {
    let store = open_store(db_path)?;
    let requeued = store.requeue_failed().await?;
    println!("Requeued {requeued} entr{}", if requeued == 1 { "y" } else { "ies" });
    Ok(requeued)
}
