use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] pawsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid record id: {0}")]
    InvalidId(String),
    #[error("Invalid JSON payload: {0}")]
    InvalidPayload(String),
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("No open conflict for record: {0}")]
    ConflictNotFound(String),
    #[error("Connectivity check failed: {0}")]
    Network(String),
    #[error("Sync is not configured. Pass --remote-url or set PAWSYNC_REMOTE_URL to enable `pawsync sync`.")]
    SyncNotConfigured,
}
