#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use songbird::Songbird;
use tracing::{error, info};

mod cli;
mod config;
mod db;
mod discord;
mod media;
mod parsers;
mod soundboard;
mod utils;
mod voice;

use cli::Cli;
use config::Config;
use discord::DiscordClient;
use media::MediaHandler;
use soundboard::{MediaResolver, PlaybackController, Soundboard};
use voice::SongbirdVoice;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from_file(&cli.config)?;
    utils::logging::init_tracing(&config.logging, cli.log_level.as_deref())?;

    info!("emoji soundboard starting up");

    let db_manager = db::DatabaseManager::new(&config.database).await?;
    db_manager.migrate().await?;
    info!("using {:?} mapping store", db_manager.db_type());

    let songbird = Songbird::serenity();
    let media = Arc::new(MediaHandler::new());
    let voice = Arc::new(SongbirdVoice::new(songbird.clone(), media.clone()));
    let resolver: Arc<dyn MediaResolver> = media;
    let playback = PlaybackController::new(
        voice,
        Some(resolver),
        Duration::from_secs(config.playback.join_timeout_secs),
    );

    let discord_client = Arc::new(DiscordClient::new(&config.discord, songbird));
    let soundboard = Arc::new(Soundboard::new(
        config.discord.command_prefix.clone(),
        config.playback.reply_on_rejected,
        db_manager.mapping_store(),
        discord_client.clone(),
        playback,
    ));
    discord_client.set_soundboard(soundboard).await;

    let start_client = discord_client.clone();
    let start_handle = tokio::spawn(async move {
        if let Err(e) = start_client.start().await {
            error!("discord client error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("emoji soundboard shutting down");

    start_handle.abort();
    discord_client.stop().await?;
    Ok(())
}
