use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pawsync")]
#[command(about = "Inspect and sync the local pawsync replica")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the engine config file (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or replace a record
    Put {
        /// Entity type: pet, health-record, lost-report or contact
        entity_type: String,
        /// Record payload as a JSON object
        payload: String,
        /// Existing record id (a new id is generated when omitted)
        #[arg(long)]
        id: Option<String>,
        /// Push this change ahead of normal-priority entries
        #[arg(long)]
        critical: bool,
    },
    /// Delete a record
    Delete {
        /// Record id
        id: String,
    },
    /// Show one record
    Get {
        /// Record id
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List live records of one type
    List {
        /// Entity type: pet, health-record, lost-report or contact
        entity_type: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queued outbox entries in push order
    Outbox {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show pending, conflict and failure counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one sync cycle against the remote
    Sync(RemoteArgs),
    /// List open conflicts, or resolved ones with --history
    Conflicts {
        /// Show the most recent resolved conflicts instead
        #[arg(long)]
        history: bool,
        /// Number of resolved conflicts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve the open conflict for a record
    Resolve {
        /// Record id
        id: String,
        #[command(flatten)]
        choice: ResolveChoice,
    },
    /// Retry outbox entries that failed permanently
    Requeue,
    /// Show recent sync sessions
    Sessions {
        /// Number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
pub struct RemoteArgs {
    /// Remote sync API base URL (falls back to PAWSYNC_REMOTE_URL)
    #[arg(long, value_name = "URL")]
    pub remote_url: Option<String>,
    /// Bearer token for the remote sync API (falls back to PAWSYNC_REMOTE_TOKEN)
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct ResolveChoice {
    /// Keep this device's value
    #[arg(long)]
    pub keep_local: bool,
    /// Adopt the remote value
    #[arg(long)]
    pub keep_remote: bool,
    /// Use a hand-merged JSON value (`null` deletes the record)
    #[arg(long, value_name = "JSON")]
    pub value: Option<String>,
}
