use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod acquisition;
mod audio;
mod bot;
mod catalog;
mod config;
mod error;
mod sources;
mod storage;
mod tasks;
mod ui;

use crate::acquisition::{AcquisitionSettings, AcquisitionWorker, ToolCheck, ToolCommand};
use crate::audio::{
    occupancy::VoiceOccupancy,
    player::{MusicPlayer, PlayerSettings},
};
use crate::bot::JukeboxBot;
use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::sources::YtDlpResolver;
use crate::storage::JsonCatalog;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;

    if std::env::args().any(|arg| arg == "--health-check") {
        acquisition::verify_dependencies(&external_tools(&config)).await?;
        println!("OK");
        return Ok(());
    }

    info!("{}", config.summary());

    acquisition::verify_dependencies(&external_tools(&config)).await?;

    let catalog: Arc<dyn CatalogStore> = Arc::new(JsonCatalog::new(config.data_dir.clone()).await?);
    let shutdown = CancellationToken::new();
    let timings = config.timings;

    // Worker de adquisición
    let worker = Arc::new(AcquisitionWorker::new(
        catalog.clone(),
        AcquisitionSettings::from_config(&config),
    ));
    tokio::spawn(tasks::supervise(
        "acquisition".to_string(),
        timings.restart_delay,
        shutdown.clone(),
        {
            let token = shutdown.clone();
            move || Arc::clone(&worker).run(token.clone())
        },
    ));

    // Janitor
    tokio::spawn(tasks::supervise(
        "janitor".to_string(),
        timings.restart_delay,
        shutdown.clone(),
        {
            let catalog = catalog.clone();
            let media_dir = config.media_dir.clone();
            let token = shutdown.clone();
            move || {
                tasks::janitor::run(
                    catalog.clone(),
                    media_dir.clone(),
                    timings.janitor_interval,
                    token.clone(),
                )
            }
        },
    ));

    let player = MusicPlayer::new(
        catalog,
        Arc::new(YtDlpResolver::new(config.ytdlp())),
        VoiceOccupancy::new(),
        PlayerSettings::from_config(&config),
    );

    // Voz y slash commands
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let config = Arc::new(config);
    let handler = JukeboxBot::new(config.clone(), player);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shutdown.cancel();
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

fn external_tools(config: &Config) -> [(&'static str, ToolCommand, ToolCheck); 3] {
    [
        ("yt-dlp", config.ytdlp(), ToolCheck::Version("--version")),
        ("ffmpeg", config.ffmpeg(), ToolCheck::Version("-version")),
        // El encoder no tiene flag de versión
        ("encoder", config.encoder(), ToolCheck::Spawns),
    ]
}
