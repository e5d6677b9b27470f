use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::{
    queue::QueueItem,
    session::{PlayOutcome, PlaybackSession, SessionSnapshot, SkipOutcome},
    transport::AudioTransport,
    ConnectionId, SessionEvent, TrackToken, Transition,
};
use crate::{
    cache::{parse_size, store::{CacheStore, ClearReport}, ActiveFiles, BudgetReport, CacheEntry, CacheStatus},
    error::{JukeboxError, Result},
};

/// Resultado de `resolve_and_play`.
#[derive(Debug, Clone)]
pub struct PlayResult {
    pub entry: CacheEntry,
    pub outcome: PlayOutcome,
    pub cache_hit: bool,
    /// Present when the track was fetched and the budget was enforced
    pub report: Option<BudgetReport>,
}

struct SessionSlot {
    session: Arc<PlaybackSession>,
    /// Serializa resolución + encolado para que la cola respete el orden de pedidos
    play_order: Arc<Mutex<()>>,
}

/// Registry of playback sessions plus the command surface the front-end calls.
///
/// One session per [`ConnectionId`]. All sessions share one [`CacheStore`]
/// and one [`ActiveFiles`] set, so the cache never evicts a file any of them
/// is streaming.
pub struct AudioPlayer {
    sessions: DashMap<ConnectionId, SessionSlot>,
    cache: Arc<CacheStore>,
    active: ActiveFiles,
    inactivity_timeout: Duration,
    default_volume: f32,
}

impl AudioPlayer {
    pub fn new(
        cache: Arc<CacheStore>,
        active: ActiveFiles,
        inactivity_timeout: Duration,
        default_volume: f32,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            cache,
            active,
            inactivity_timeout,
            default_volume,
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Crea la sesión de una conexión de voz y devuelve su canal de eventos.
    pub fn connect(
        &self,
        connection: ConnectionId,
        transport: Arc<dyn AudioTransport>,
    ) -> Result<mpsc::UnboundedReceiver<SessionEvent>> {
        use dashmap::mapref::entry::Entry;

        match self.sessions.entry(connection) {
            Entry::Occupied(_) => Err(JukeboxError::AlreadyConnected(connection)),
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let session = PlaybackSession::new(
                    connection,
                    transport,
                    self.active.clone(),
                    self.inactivity_timeout,
                    self.default_volume,
                    tx,
                );
                session.start_watchdog();
                slot.insert(SessionSlot {
                    session,
                    play_order: Arc::new(Mutex::new(())),
                });
                info!("🔗 [{}] Conectado al canal de voz", connection);
                Ok(rx)
            }
        }
    }

    pub async fn disconnect(&self, connection: ConnectionId) -> Result<()> {
        let (_, slot) = self
            .sessions
            .remove(&connection)
            .ok_or(JukeboxError::NoSession(connection))?;
        slot.session.shutdown().await;
        Ok(())
    }

    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.sessions.contains_key(&connection)
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        self.sessions.iter().map(|slot| *slot.key()).collect()
    }

    /// Resuelve la referencia (caché o worker) y la reproduce o la encola.
    ///
    /// Requests for the same connection are handled one at a time, so the
    /// queue order always matches the order the requests arrived in.
    pub async fn resolve_and_play(
        &self,
        connection: ConnectionId,
        source_ref: &str,
        requested_by: Option<&str>,
    ) -> Result<PlayResult> {
        let (session, play_order) = {
            let slot = self
                .sessions
                .get(&connection)
                .ok_or(JukeboxError::NoSession(connection))?;
            (slot.session.clone(), slot.play_order.clone())
        };
        let _order = play_order.lock().await;

        let resolved = self.cache.resolve(source_ref).await?;
        if let Some(report) = resolved.report.as_ref().filter(|r| !r.evicted.is_empty()) {
            debug!("🧹 [{}] Evicción tras descarga: {}", connection, report);
        }

        let mut item = QueueItem::from(resolved.entry.clone());
        if let Some(user) = requested_by {
            item = item.requested_by(user);
        }

        let outcome = session.enqueue_and_maybe_start(item).await?;
        Ok(PlayResult {
            entry: resolved.entry,
            outcome,
            cache_hit: resolved.cache_hit,
            report: resolved.report,
        })
    }

    pub async fn list_queue(&self, connection: ConnectionId) -> Result<Vec<QueueItem>> {
        Ok(self.session(connection)?.list_queue().await)
    }

    pub async fn now_playing(&self, connection: ConnectionId) -> Result<SessionSnapshot> {
        Ok(self.session(connection)?.snapshot().await)
    }

    pub async fn pause(&self, connection: ConnectionId) -> Result<Transition> {
        self.session(connection)?.pause().await
    }

    pub async fn resume(&self, connection: ConnectionId) -> Result<Transition> {
        self.session(connection)?.resume().await
    }

    pub async fn skip(&self, connection: ConnectionId) -> Result<SkipOutcome> {
        self.session(connection)?.skip().await
    }

    /// Reproduce de nuevo una entrada ya cacheada, sin pasar por la cola.
    pub async fn replay(&self, connection: ConnectionId, id: &str) -> Result<CacheEntry> {
        let session = self.session(connection)?;
        let entry = self
            .cache
            .lookup(id)
            .await
            .ok_or_else(|| JukeboxError::NotFound(id.to_string()))?;

        session.replay(entry.clone()).await?;
        Ok(entry)
    }

    pub async fn stop(&self, connection: ConnectionId) -> Result<usize> {
        self.session(connection)?.stop().await
    }

    /// Ajusta el volumen en porcentaje (0-200). Devuelve el valor aplicado.
    pub async fn set_volume(&self, connection: ConnectionId, percent: u32) -> Result<u32> {
        let applied = self
            .session(connection)?
            .set_volume(percent as f32 / 100.0)
            .await?;
        Ok((applied * 100.0).round() as u32)
    }

    /// Fija el límite de la caché a partir de un texto como `5GB` o `500MB`.
    ///
    /// Malformed input is rejected before anything is written.
    pub async fn set_cache_limit(&self, text: &str) -> Result<BudgetReport> {
        let bytes = parse_size(text)?;
        self.cache.set_budget(bytes).await
    }

    pub async fn clear_cache(&self) -> Result<ClearReport> {
        self.cache.clear().await
    }

    pub async fn cache_status(&self) -> Result<CacheStatus> {
        self.cache.status().await
    }

    /// Punto de entrada del transporte cuando termina un stream.
    pub async fn track_finished(&self, connection: ConnectionId, token: TrackToken) -> bool {
        match self.session(connection) {
            Ok(session) => session.track_finished(token).await,
            Err(_) => {
                debug!("[{}] Fin de track para una sesión cerrada", connection);
                false
            }
        }
    }

    /// Cierra todas las sesiones (apagado del proceso).
    pub async fn shutdown(&self) {
        for connection in self.connections() {
            if let Err(e) = self.disconnect(connection).await {
                warn!("⚠️ [{}] Error cerrando sesión: {}", connection, e);
            }
        }
    }

    fn session(&self, connection: ConnectionId) -> Result<Arc<PlaybackSession>> {
        self.sessions
            .get(&connection)
            .map(|slot| slot.session.clone())
            .ok_or(JukeboxError::NoSession(connection))
    }
}
