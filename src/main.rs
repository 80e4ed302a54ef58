use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod health;
mod sources;
mod ui;

use crate::bot::TuneBot;
use crate::config::Config;
use crate::sources::SourceManager;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tunebot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting TuneBot v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load().map_err(|e| {
        error!("❌ {:#}", e);
        e
    })?;

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    match SourceManager::new(&config).verify_dependencies().await {
        Ok(version) => info!("✅ yt-dlp {} found", version),
        Err(e) => error!("❌ yt-dlp is not usable, playback will fail: {:#}", e),
    }

    health::serve(config.port).await?;

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let token = config.discord_token.clone();
    let handler = TuneBot::new(config);

    let mut client = Client::builder(&token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error listening for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, closing...");
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
        return Err(why.into());
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    SourceManager::new(config).verify_dependencies().await?;
    println!("OK");
    Ok(())
}
