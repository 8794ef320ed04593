pub mod browser;
pub mod cli;
pub mod commands;
pub mod config;
pub mod database;
pub mod dom;
pub mod error;
pub mod relay;
pub mod sites;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use browser::automation::CdpTabHost;
use browser::chrome;
use browser::tabs::{TabLocator, TabRecovery};
use cli::{Cli, Commands};
use config::RelayConfig;
use database::Database;
use relay::connection::ConnectionManager;
use relay::dispatcher::Relay;
use relay::journal::Level;
use relay::monitor::SessionMonitor;
use relay::state::RelayState;
use serde_json::json;
use std::sync::Arc;

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            endpoint,
            chrome_port,
        } => {
            if let Some(endpoint) = endpoint {
                config.endpoint = endpoint;
            }
            if let Some(port) = chrome_port {
                config.chrome_debug_port = port;
            }
            run_daemon(config).await
        }
        Commands::Status { watch } => commands::status::show_status(&config, watch).await,
        Commands::Open { site } => commands::open::open_site(&config, &site).await,
        Commands::Arm => commands::arm::arm(&config).await,
    }
}

async fn run_daemon(config: RelayConfig) -> Result<()> {
    let data_dir = config.data_dir()?;
    let db = Arc::new(Database::new(&data_dir)?);
    log::info!("chat-relay initialized. DB at: {}", data_dir.display());

    let sites = sites::all_sites();
    let start_urls: Vec<&str> = sites.iter().map(|site| config.open_url(site)).collect();
    let session = chrome::prepare_chrome_session(&config, &start_urls).await?;
    log::info!(
        "[Chrome session] mode={} port={}",
        session.mode.as_str(),
        session.port
    );

    let host = Arc::new(CdpTabHost::connect(session.port).await?);
    let state = Arc::new(RelayState::new(sites.clone(), Some(db)));
    state.record(
        Level::System,
        "Relay daemon starting",
        Some(json!({
            "endpoint": config.endpoint,
            "chrome_port": session.port,
            "chrome_mode": session.mode.as_str(),
        })),
    );

    let locator = Arc::new(TabLocator::new(host.clone(), state.clone()));
    let recovery = Arc::new(TabRecovery::new(
        locator.clone(),
        state.clone(),
        config.tab_restore_delay(),
        config.site_urls.clone(),
    ));
    let relay = Arc::new(Relay::new(locator.clone(), recovery.clone(), state.clone()));

    for site in sites {
        let monitor = SessionMonitor::new(
            site,
            locator.clone(),
            state.clone(),
            config.message_poll(),
            config.session_save(),
        );
        tokio::spawn(monitor.run());
    }

    let rescan_every = config.tab_rescan();
    let rescanner = locator.clone();
    tokio::spawn(async move { rescanner.rescan_every(rescan_every).await });

    let removals = host.removals().await?;
    let watcher = recovery.clone();
    tokio::spawn(async move { watcher.watch(removals).await });

    let manager = ConnectionManager::new(
        config.endpoint.clone(),
        relay,
        config.heartbeat(),
        config.reconnect_delay(),
        config.construction_retry(),
    );

    tokio::select! {
        _ = manager.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            state.record(Level::System, "Relay daemon stopping", None);
        }
    }
    Ok(())
}
