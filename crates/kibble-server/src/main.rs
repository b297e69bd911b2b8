mod config;

use std::sync::Arc;

use tracing::{error, info};

use kibble_bot::{
    ALERT_CHANNEL_ID, ApprovalPipeline, Bot, DiscordAlerter, IpifyLookup, SqliteConnector, Supervisor, TeamManager,
    connection_state, run_sweep_loop,
};
use kibble_gateway::connection::run_gateway;
use kibble_gateway::{ChatPlatform, DiscordPlatform, Dispatcher, RestClient};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kibble=debug,kibble_bot=debug,kibble_gateway=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!(?config, "Starting kibble");

    // Platform
    let dispatcher = Dispatcher::new();
    let rest = RestClient::new(&config.discord_token)?;
    let platform: Arc<dyn ChatPlatform> = Arc::new(DiscordPlatform::new(rest, dispatcher.clone()));

    // Store supervision
    let (writer, store) = connection_state();
    let supervisor = Supervisor::new(
        Arc::new(SqliteConnector::new(&config.db_path)),
        Arc::new(DiscordAlerter::new(config.discord_token.clone(), ALERT_CHANNEL_ID)),
        Arc::new(IpifyLookup::new()?),
        writer,
    )
    .with_retry_delay(config.db_retry_delay);

    tokio::spawn(async move {
        if let Err(e) = supervisor.supervise().await {
            error!("{}. Exiting.", e);
            std::process::exit(1);
        }
    });

    // Bot components
    let approvals = Arc::new(
        ApprovalPipeline::new(platform.clone(), store, config.intake_channel)
            .with_outage_policy(config.outage_policy),
    );
    let teams = Arc::new(TeamManager::new(platform.clone()));

    tokio::spawn(approvals.clone().run_outage_drain());
    tokio::spawn(run_sweep_loop(teams.clone(), config.sweep_interval));

    // Subscribe before the gateway starts so nothing is missed
    let events = platform.subscribe();
    tokio::spawn(Bot::new(platform, approvals, teams).run(events));

    info!("Connecting to the Discord gateway");
    tokio::select! {
        result = run_gateway(config.discord_token.clone(), dispatcher) => {
            result?;
        }
        _ = shutdown_signal() => {}
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
