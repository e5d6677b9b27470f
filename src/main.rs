use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod sources;
mod storage;
mod ui;

use crate::audio::{player::AudioPlayer, ConnectionId};
use crate::bot::JukeboxBot;
use crate::cache::{store::CacheStore, ActiveFiles};
use crate::config::Config;
use crate::sources::WorkerFetcher;
use crate::storage::JsonStorage;

/// Canal de voz que maneja el front-end de consola
const CONSOLE_CONNECTION: ConnectionId = ConnectionId(1);

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("jukebox=debug".parse()?),
        )
        .init();

    info!("🎵 Iniciando Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    let fetcher = WorkerFetcher::new(&config.fetch_worker, config.fetch_timeout)?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        fetcher.health_check().await?;
        println!("OK");
        return Ok(());
    }

    // Inicializar caché en disco
    let storage = JsonStorage::new(config.cache_dir.clone(), &config.metadata_file, &config.limit_file).await?;
    let active = ActiveFiles::new();
    let cache = CacheStore::open(storage, config.default_cache_limit, active.clone(), Arc::new(fetcher)).await?;

    // El límite pudo cambiar mientras el bot estaba apagado
    let report = cache.enforce_budget().await?;
    if report.within_budget() {
        info!("🗄️ Caché: {}", report);
    } else {
        warn!("⚠️ Caché por encima del límite: {}", report);
    }

    let player = Arc::new(AudioPlayer::new(
        Arc::new(cache),
        active,
        config.inactivity_timeout,
        config.default_volume,
    ));

    let (ended_tx, ended_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    bot::events::forward_track_ends(player.clone(), ended_rx);
    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            println!("{}", message);
        }
    });

    let user = std::env::var("USER").unwrap_or_else(|_| "consola".to_string());
    let bot = JukeboxBot::new(
        player.clone(),
        CONSOLE_CONNECTION,
        Duration::from_secs(1),
        ended_tx,
        out_tx,
    );

    // Iniciar bot
    info!("🚀 Jukebox iniciado exitosamente");
    tokio::select! {
        result = bot.run_console(&user) => {
            if let Err(e) = result {
                error!("Error leyendo comandos: {:?}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("⚠️ Señal de shutdown recibida, cerrando...");
        }
    }

    player.shutdown().await;
    Ok(())
}
