//! pawsync CLI - inspect and sync the local pet-care replica
//!
//! Every command except `sync` works offline against the local database.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::{resolve_config_path, resolve_db_path};
use crate::commands::conflicts::{run_conflicts, run_resolve};
use crate::commands::outbox::run_outbox;
use crate::commands::records::{run_delete, run_get, run_list, run_put};
use crate::commands::sessions::{run_requeue, run_sessions};
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "pawsync=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Put {
            entity_type,
            payload,
            id,
            critical,
        } => {
            run_put(&entity_type, &payload, id.as_deref(), critical, &db_path).await?;
        }
        Commands::Delete { id } => run_delete(&id, &db_path).await?,
        Commands::Get { id, json } => run_get(&id, json, &db_path).await?,
        Commands::List { entity_type, json } => run_list(&entity_type, json, &db_path).await?,
        Commands::Outbox { json } => run_outbox(json, &db_path).await?,
        Commands::Status { json } => run_status(json, &db_path).await?,
        Commands::Sync(remote) => {
            let config_path = resolve_config_path(cli.config);
            run_sync(remote, &db_path, &config_path).await?;
        }
        Commands::Conflicts {
            history,
            limit,
            json,
        } => run_conflicts(history, limit, json, &db_path).await?,
        Commands::Resolve { id, choice } => {
            run_resolve(&id, &choice, &db_path).await?;
        }
        Commands::Requeue => {
            run_requeue(&db_path).await?;
        }
        Commands::Sessions { limit, json } => run_sessions(limit, json, &db_path).await?,
    }

    Ok(())
}
