use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{player::AudioPlayer, transport::TrackEnded, ConnectionId, SessionEvent},
    ui::embeds,
};

/// Reenvía al reproductor los fines de track que reporta el transporte.
pub fn forward_track_ends(
    player: Arc<AudioPlayer>,
    mut ended: mpsc::UnboundedReceiver<TrackEnded>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(TrackEnded { connection, token }) = ended.recv().await {
            info!("🎵 Track terminó en {}", connection);
            if !player.track_finished(connection, token).await {
                debug!("[{}] Fin de track ignorado ({:?})", connection, token);
            }
        }
    })
}

/// Escucha los eventos de una sesión y los convierte en mensajes.
///
/// A teardown request disconnects the session and ends the listener.
pub fn watch_session(
    player: Arc<AudioPlayer>,
    connection: ConnectionId,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    out: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let message = match event {
                SessionEvent::NowPlaying { entry, replay } => {
                    embeds::now_playing_card(&entry, replay).to_string()
                }
                SessionEvent::TrackFailed { entry, reason } => {
                    error!("❌ [{}] Error en track {}: {}", connection, entry.id, reason);
                    embeds::error_card(format!("No se pudo reproducir {}: {}", entry.title, reason)).to_string()
                }
                SessionEvent::TeardownRequested => {
                    if let Err(e) = player.disconnect(connection).await {
                        warn!("⚠️ [{}] Error al desconectar por inactividad: {}", connection, e);
                    }
                    let _ = out.send("💤 El bot salió del canal de voz por inactividad.".to_string());
                    break;
                }
            };

            if out.send(message).is_err() {
                break;
            }
        }
        debug!("[{}] Listener de eventos terminado", connection);
    })
}
