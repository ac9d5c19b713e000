use std::env;
use std::path::{Path, PathBuf};

use pawsync_core::models::{OutboxEntry, SyncConflict, SyncSession};
use pawsync_core::util::{compact_text, normalize_text_option};
use pawsync_core::{EngineConfig, EntityId, EntityRecord, EntityType, LocalStore};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

const PREVIEW_CHARS: usize = 60;

#[derive(Debug, Serialize)]
pub struct RecordItem {
    pub id: String,
    pub entity_type: String,
    pub payload: Value,
    pub sync_status: String,
    pub local_version: i64,
    pub remote_version: Option<i64>,
    pub updated_at: i64,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct OutboxItem {
    pub id: String,
    pub entity_id: String,
    pub entity_type: String,
    pub operation: String,
    pub priority: String,
    pub retry_count: u32,
    pub next_attempt_at: i64,
    pub permanent_failure: bool,
    pub last_error: Option<String>,
}

/// Remote endpoint settings for `pawsync sync`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub url: String,
    pub token: Option<String>,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("PAWSYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pawsync")
        .join("pawsync.db")
}

pub fn resolve_config_path(cli_config: Option<PathBuf>) -> PathBuf {
    cli_config
        .or_else(|| env::var_os("PAWSYNC_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pawsync")
                .join("config.json")
        })
}

/// Flags win over the environment; blank values count as unset.
pub fn resolve_remote_settings(
    flag_url: Option<String>,
    flag_token: Option<String>,
    env_url: Option<String>,
    env_token: Option<String>,
) -> Option<RemoteSettings> {
    let url = normalize_text_option(flag_url).or_else(|| normalize_text_option(env_url))?;
    let token = normalize_text_option(flag_token).or_else(|| normalize_text_option(env_token));
    Some(RemoteSettings { url, token })
}

pub fn open_store(db_path: &Path) -> Result<LocalStore, CliError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = LocalStore::open_path(db_path)?;
    tracing::debug!(path = %db_path.display(), "opened local database");
    Ok(store)
}

pub fn load_config(config_path: &Path) -> Result<EngineConfig, CliError> {
    let config = EngineConfig::load_from_path(config_path)?;
    tracing::debug!(path = %config_path.display(), "loaded engine config");
    Ok(config)
}

pub fn parse_entity_id(raw: &str) -> Result<EntityId, CliError> {
    raw.trim()
        .parse()
        .map_err(|_| CliError::InvalidId(raw.trim().to_string()))
}

pub fn parse_entity_type(raw: &str) -> Result<EntityType, CliError> {
    Ok(raw.trim().to_ascii_lowercase().parse()?)
}

pub fn parse_json(raw: &str) -> Result<Value, CliError> {
    serde_json::from_str(raw).map_err(|error| CliError::InvalidPayload(error.to_string()))
}

pub fn record_to_item(record: &EntityRecord, now_ms: i64) -> RecordItem {
    RecordItem {
        id: record.id.to_string(),
        entity_type: record.entity_type.as_str().to_string(),
        payload: record.payload.clone(),
        sync_status: record.sync_status.as_str().to_string(),
        local_version: record.local_version,
        remote_version: record.remote_version,
        updated_at: record.updated_at,
        relative_time: format_relative_time(record.updated_at, now_ms),
    }
}

pub fn outbox_to_item(entry: &OutboxEntry) -> OutboxItem {
    OutboxItem {
        id: entry.id.to_string(),
        entity_id: entry.entity_id.to_string(),
        entity_type: entry.entity_type.as_str().to_string(),
        operation: entry.operation.as_str().to_string(),
        priority: priority_label(entry).to_string(),
        retry_count: entry.retry_count,
        next_attempt_at: entry.next_attempt_at,
        permanent_failure: entry.permanent_failure,
        last_error: entry.last_error.clone(),
    }
}

fn priority_label(entry: &OutboxEntry) -> &'static str {
    match entry.priority {
        pawsync_core::models::Priority::Critical => "critical",
        pawsync_core::models::Priority::Normal => "normal",
    }
}

pub fn payload_preview(payload: &Value, max_chars: usize) -> String {
    let rendered = compact_text(&payload.to_string());
    if rendered.chars().count() <= max_chars {
        return rendered;
    }

    let truncated: String = rendered.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{truncated}...")
}

pub fn format_record_lines(records: &[EntityRecord], now_ms: i64) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            format!(
                "{} [{}] {} {}",
                record.id,
                record.sync_status.as_str(),
                payload_preview(&record.payload, PREVIEW_CHARS),
                format_relative_time(record.updated_at, now_ms)
            )
        })
        .collect()
}

pub fn format_outbox_lines(entries: &[OutboxEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let mut line = format!(
                "{} {} {} {} retries={}",
                priority_label(entry),
                entry.operation.as_str(),
                entry.entity_type.as_str(),
                entry.entity_id,
                entry.retry_count
            );
            if entry.permanent_failure {
                line.push_str(" FAILED");
            }
            if let Some(error) = &entry.last_error {
                line.push_str(&format!(" ({error})"));
            }
            line
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let fields = if conflict.fields.is_empty() {
                "-".to_string()
            } else {
                conflict.fields.join(",")
            };
            let state = conflict.resolution_strategy.map_or_else(
                || format!("open since {}", format_sync_timestamp(conflict.detected_at)),
                |strategy| {
                    format!(
                        "{} at {}",
                        strategy.as_str(),
                        conflict
                            .resolved_at
                            .map_or_else(|| "-".to_string(), format_sync_timestamp)
                    )
                },
            );
            format!(
                "{} fields={fields} remote_v={} {state}",
                conflict.entity_id, conflict.remote_version
            )
        })
        .collect()
}

pub fn format_session_lines(sessions: &[SyncSession]) -> Vec<String> {
    sessions
        .iter()
        .map(|session| format!("{} {session}", format_sync_timestamp(session.started_at)))
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}
