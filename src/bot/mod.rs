//! # Bot Module
//!
//! Console front-end for the jukebox.
//!
//! Reads `!command` lines (the same commands the chat bot exposes), runs
//! them against the [`AudioPlayer`] and prints the replies as text cards.
//!
//! ## Architecture
//!
//! - [`commands`]: parsing of `!play`, `!skip`, `!cacheLimit`... into [`commands::Command`]
//! - [`events`]: background tasks that forward track ends to the player and
//!   turn session events into messages
//! - [`JukeboxBot`]: the dispatcher; it joins the voice connection on demand
//!   with a [`SimulatedTransport`]
//!
//! ## Example
//!
//! ```rust,no_run
//! # use std::{sync::Arc, time::Duration};
//! # use jukebox::{audio::{player::AudioPlayer, ConnectionId}, bot::JukeboxBot};
//! # async fn example(player: Arc<AudioPlayer>) -> anyhow::Result<()> {
//! let (ended_tx, ended_rx) = tokio::sync::mpsc::unbounded_channel();
//! let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel();
//! let bot = JukeboxBot::new(player, ConnectionId(1), Duration::from_secs(1), ended_tx, out_tx);
//!
//! let reply = bot.handle_line("!play https://youtu.be/dQw4w9WgXcQ", "rick").await;
//! println!("{}", reply);
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod events;

use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::{error, info, warn};

use crate::{
    audio::{
        player::AudioPlayer,
        session::{PlayOutcome, SkipOutcome},
        transport::{SimulatedTransport, TrackEnded},
        ConnectionId, Transition,
    },
    error::{JukeboxError, Result},
    ui::embeds,
};
use commands::{help_text, Command};

/// Despachador de comandos de texto sobre un único canal de voz.
pub struct JukeboxBot {
    player: Arc<AudioPlayer>,
    connection: ConnectionId,
    /// Duración de un "segundo" de reproducción en el transporte simulado
    tick: Duration,
    ended: mpsc::UnboundedSender<TrackEnded>,
    out: mpsc::UnboundedSender<String>,
}

impl JukeboxBot {
    pub fn new(
        player: Arc<AudioPlayer>,
        connection: ConnectionId,
        tick: Duration,
        ended: mpsc::UnboundedSender<TrackEnded>,
        out: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            player,
            connection,
            tick,
            ended,
            out,
        }
    }

    /// Ejecuta una línea de texto y devuelve la respuesta para el usuario.
    pub async fn handle_line(&self, line: &str, user: &str) -> String {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => return e.to_string(),
        };

        match self.dispatch(command, user).await {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_storage() {
                    error!("❌ Error de almacenamiento: {}", e);
                } else {
                    warn!("⚠️ Comando fallido: {}", e);
                }
                embeds::error_card(e.to_string()).to_string()
            }
        }
    }

    async fn dispatch(&self, command: Command, user: &str) -> Result<String> {
        let conn = self.connection;

        let reply = match command {
            Command::Join => match self.join(user) {
                Ok(reply) => reply,
                Err(JukeboxError::AlreadyConnected(_)) => "El bot ya está en el canal de voz.".to_string(),
                Err(e) => return Err(e),
            },
            Command::Leave => match self.player.disconnect(conn).await {
                Ok(()) => format!("👋 Salí del canal de voz a pedido de {}", user),
                Err(JukeboxError::NoSession(_)) => "El bot no está conectado a un canal de voz.".to_string(),
                Err(e) => return Err(e),
            },
            Command::Play(source_ref) => {
                let joined = self.ensure_joined(user)?;
                let result = self.player.resolve_and_play(conn, &source_ref, Some(user)).await?;
                let origin = if result.cache_hit { "desde caché" } else { "descargada" };
                let status = match result.outcome {
                    PlayOutcome::Started(_) => format!("▶️ {} ({})", result.entry.title, origin),
                    PlayOutcome::Queued { position } => {
                        format!("➕ Agregada a la cola en posición {}: {} ({})", position, result.entry.title, origin)
                    }
                };
                match joined {
                    Some(joined) => format!("{}\n{}", joined, status),
                    None => status,
                }
            }
            Command::Playlist => embeds::queue_card(&self.player.list_queue(conn).await?).to_string(),
            Command::Pause => match self.player.pause(conn).await? {
                Transition::Applied => "⏸️ Canción pausada".to_string(),
                Transition::Ignored(state) => format!("No hay nada reproduciéndose ({})", state),
            },
            Command::Resume => match self.player.resume(conn).await? {
                Transition::Applied => "▶️ Canción reanudada".to_string(),
                Transition::Ignored(state) => format!("No hay nada en pausa ({})", state),
            },
            Command::Skip => match self.player.skip(conn).await? {
                SkipOutcome::Skipped { skipped, .. } => format!(
                    "⏭️ Saltada: {}",
                    skipped.map_or_else(|| "?".to_string(), |entry| entry.title)
                ),
                SkipOutcome::Ignored => "No hay nada que saltar.".to_string(),
            },
            Command::Replay(target) => {
                self.ensure_joined(user)?;
                let id = self.find_cached(&target).await?;
                let entry = self.player.replay(conn, &id).await?;
                format!("🔄 Repitiendo: {}", entry.title)
            }
            Command::Stop => {
                let drained = self.player.stop(conn).await?;
                format!("⏹️ Música detenida, {} canciones quitadas de la cola", drained)
            }
            Command::Volume(percent) => {
                let applied = self.player.set_volume(conn, percent).await?;
                format!("🔊 Volumen ajustado a {}%", applied)
            }
            Command::CacheLimit(text) => {
                let report = self.player.set_cache_limit(&text).await?;
                embeds::budget_card(&report).field("Nuevo límite", text.to_uppercase()).to_string()
            }
            Command::ClearCache => embeds::clear_card(&self.player.clear_cache().await?).to_string(),
            Command::NowPlaying => embeds::session_card(&self.player.now_playing(conn).await?).to_string(),
            Command::Cache => embeds::cache_status_card(&self.player.cache_status().await?).to_string(),
            Command::Help => help_text(),
        };

        Ok(reply)
    }

    fn join(&self, user: &str) -> Result<String> {
        let transport = Arc::new(SimulatedTransport::new(self.connection, self.tick, self.ended.clone()));
        let events = self.player.connect(self.connection, transport)?;
        events::watch_session(self.player.clone(), self.connection, events, self.out.clone());

        info!("🔗 {} conectó el bot al canal {}", user, self.connection);
        Ok(format!("🔗 Conectado al canal de voz a pedido de {}", user))
    }

    /// Conecta si hace falta; devuelve el mensaje de conexión cuando se unió.
    fn ensure_joined(&self, user: &str) -> Result<Option<String>> {
        if self.player.is_connected(self.connection) {
            return Ok(None);
        }
        self.join(user).map(Some)
    }

    /// Busca por ID y, si no, por título exacto (sin distinguir mayúsculas).
    async fn find_cached(&self, target: &str) -> Result<String> {
        let cache = self.player.cache();
        if cache.lookup(target).await.is_some() {
            return Ok(target.to_string());
        }

        cache
            .entries()
            .await
            .into_iter()
            .find(|entry| entry.title.eq_ignore_ascii_case(target))
            .map(|entry| entry.id)
            .ok_or_else(|| JukeboxError::NotFound(target.to_string()))
    }

    /// Lee comandos de stdin hasta EOF.
    pub async fn run_console(&self, user: &str) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        info!("⌨️ Escribe !help para ver los comandos");

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let reply = self.handle_line(&line, user).await;
            if self.out.send(reply).is_err() {
                break;
            }
        }
        Ok(())
    }
}
