use std::env;
use std::path::Path;
use std::time::Duration;

use pawsync_core::network::{ConnectionKind, Connectivity, NetworkMonitor, NetworkState};
use pawsync_core::{HttpRemote, SyncClient, SyncReport};

use crate::cli::RemoteArgs;
use crate::commands::common::{load_config, open_store, resolve_remote_settings};
use crate::error::CliError;

pub async fn run_sync(
    remote: RemoteArgs,
    db_path: &Path,
    config_path: &Path,
) -> Result<(), CliError> {
    let settings = resolve_remote_settings(
        remote.remote_url,
        remote.token,
        env::var("PAWSYNC_REMOTE_URL").ok(),
        env::var("PAWSYNC_REMOTE_TOKEN").ok(),
    )
    .ok_or(CliError::SyncNotConfigured)?;

    tracing::info!(
        remote = %settings.url,
        authenticated = settings.token.is_some(),
        "syncing with remote"
    );
    let config = load_config(config_path)?;
    let store = open_store(db_path)?;
    let remote = HttpRemote::new(settings.url, settings.token, config.request_timeout())?;

    // A one-shot run trusts the caller's claim that the device is online.
    let network = NetworkMonitor::spawn(Duration::ZERO);
    let client = SyncClient::with_monitor(store, remote, network.clone(), config);
    network.report(Connectivity::online(ConnectionKind::Unknown));
    network
        .subscribe()
        .wait_for(|state| *state == NetworkState::Online)
        .await
        .map_err(|error| CliError::Network(error.to_string()))?;

    let report = client.force_sync().await;
    client.shutdown().await;

    match report? {
        SyncReport::Finished(session) => {
            println!("{session}");
            if let Some(error) = client.status().last_error {
                eprintln!("warning: {error}");
            }
        }
        SyncReport::Coalesced => println!("Sync completed"),
        SyncReport::Offline => {
            return Err(CliError::Network("device is offline".to_string()));
        }
    }
    Ok(())
}
