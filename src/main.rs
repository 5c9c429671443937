#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cli;
mod config;
mod db;
mod discord;
mod utils;
mod voice;
mod web;

use cli::Cli;
use config::Config;
use voice::VoiceCore;
use web::WebServer;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Arc::new(Config::load_from_file(&cli.config)?);
    utils::logging::init_tracing(&config.logging, cli.log_level.as_deref());
    info!(config = %cli.config.display(), "join-to-create starting up");

    let db_manager = Arc::new(db::DatabaseManager::new(&config.database).await?);
    db_manager.migrate().await?;

    let discord_client = Arc::new(discord::DiscordClient::new(config.clone()));
    let voice = Arc::new(VoiceCore::new(
        Arc::new(discord_client.platform()),
        db_manager.config_store(),
        db_manager.temp_channel_store(),
        &config.voice,
    ));
    discord_client.set_voice(voice.clone()).await;

    let web_server = WebServer::new(config.clone(), voice.clone()).await?;
    let mut web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.start().await {
            error!("web server error: {}", e);
        }
    });

    let gateway = {
        let discord_client = discord_client.clone();
        async move {
            discord_client.start().await?;
            discord_client.closed().await;
            anyhow::Ok(())
        }
    };

    tokio::select! {
        result = gateway => match result {
            Ok(()) => error!("discord gateway terminated"),
            Err(e) => error!("discord client error: {}", e),
        },
        _ = &mut web_handle => error!("web server exited"),
        _ = shutdown_signal() => {},
    }

    info!("join-to-create shutting down");
    voice.shutdown();
    if let Err(e) = discord_client.stop().await {
        error!("failed to stop discord client: {}", e);
    }
    web_handle.abort();

    Ok(())
}
