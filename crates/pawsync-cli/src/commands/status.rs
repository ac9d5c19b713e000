use std::path::Path;

use pawsync_core::models::SyncSession;
use serde::Serialize;

use crate::commands::common::{format_sync_timestamp, open_store};
use crate::error::CliError;

/// Offline view of the replica; the CLI does not observe connectivity.
#[derive(Debug, Serialize)]
pub struct StatusView {
    pub pending_count: usize,
    pub conflict_count: usize,
    pub failed_count: usize,
    pub last_sync_at: Option<i64>,
    pub last_session: Option<SyncSession>,
}

pub async fn load_status(db_path: &Path) -> Result<StatusView, CliError> {
    let store = open_store(db_path)?;
    let counts = store.counts().await?;
    Ok(StatusView {
        pending_count: counts.pending,
        conflict_count: counts.conflicts,
        failed_count: counts.failed,
        last_sync_at: store.last_sync_at().await?,
        last_session: store.recent_sessions(1).await?.into_iter().next(),
    })
}

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let status = load_status(db_path).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("pending:   {}", status.pending_count);
    println!("conflicts: {}", status.conflict_count);
    println!("failed:    {}", status.failed_count);
    println!(
        "last sync: {}",
        status
            .last_sync_at
            .map_or_else(|| "never".to_string(), format_sync_timestamp)
    );
    if let Some(session) = status.last_session {
        println!("last run:  {session}");
    }
    Ok(())
}
