use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::{
    inactivity::InactivityMonitor,
    queue::{PlaybackQueue, QueueItem},
    transport::AudioTransport,
    ConnectionId, PlaybackState, SessionEvent, TrackToken, Transition,
};
use crate::{
    cache::{ActiveFiles, CacheEntry},
    error::{JukeboxError, Result},
};

/// Resultado de agregar una canción a la sesión.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayOutcome {
    /// The session was idle and started this track right away
    Started(CacheEntry),
    /// Something is active; the track waits at this 1-based position
    Queued { position: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipOutcome {
    Skipped {
        skipped: Option<CacheEntry>,
        next: Option<CacheEntry>,
    },
    Ignored,
}

/// Vista de solo lectura del estado de una sesión.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: PlaybackState,
    pub current: Option<CacheEntry>,
    pub queue: Vec<QueueItem>,
    pub queue_duration: Duration,
    pub volume: f32,
}

struct SessionState {
    state: PlaybackState,
    current: Option<CacheEntry>,
    queue: PlaybackQueue,
    token: Option<TrackToken>,
    issued_tokens: u64,
    volume: f32,
}

/// Playback controller for one voice connection.
///
/// All transitions run under one async lock, so commands, track-end events
/// and inactivity fires never interleave. The file of the current item is
/// pinned in [`ActiveFiles`] for as long as it is current. Every entry into
/// `Playing` re-arms the inactivity monitor; becoming `Idle` leaves it armed.
pub struct PlaybackSession {
    connection: ConnectionId,
    transport: Arc<dyn AudioTransport>,
    active: ActiveFiles,
    monitor: InactivityMonitor,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: Mutex<SessionState>,
    this: Weak<PlaybackSession>,
}

impl PlaybackSession {
    pub fn new(
        connection: ConnectionId,
        transport: Arc<dyn AudioTransport>,
        active: ActiveFiles,
        inactivity_timeout: Duration,
        default_volume: f32,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            connection,
            transport,
            active,
            monitor: InactivityMonitor::new(inactivity_timeout),
            events,
            state: Mutex::new(SessionState {
                state: PlaybackState::Idle,
                current: None,
                queue: PlaybackQueue::new(),
                token: None,
                issued_tokens: 0,
                volume: default_volume,
            }),
            this: this.clone(),
        })
    }

    /// Arma el watchdog sin transición (al conectarse al canal).
    pub fn start_watchdog(&self) {
        self.arm_inactivity();
    }

    pub async fn state(&self) -> PlaybackState {
        self.state.lock().await.state
    }

    pub async fn now_playing(&self) -> Option<CacheEntry> {
        self.state.lock().await.current.clone()
    }

    pub async fn list_queue(&self) -> Vec<QueueItem> {
        self.state.lock().await.queue.peek_all()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let st = self.state.lock().await;
        SessionSnapshot {
            state: st.state,
            current: st.current.clone(),
            queue: st.queue.peek_all(),
            queue_duration: st.queue.total_duration(),
            volume: st.volume,
        }
    }

    /// Encola la canción y, si la sesión está inactiva, la reproduce de inmediato.
    pub async fn enqueue_and_maybe_start(&self, item: QueueItem) -> Result<PlayOutcome> {
        let mut st = self.state.lock().await;
        let position = st.queue.enqueue(item);

        if st.state != PlaybackState::Idle {
            return Ok(PlayOutcome::Queued { position });
        }

        match self.advance_locked(&mut st).await? {
            Some(entry) => Ok(PlayOutcome::Started(entry)),
            None => Err(JukeboxError::Transport(
                "no se pudo iniciar ninguna canción de la cola".to_string(),
            )),
        }
    }

    /// Fin de stream reportado por el transporte.
    ///
    /// Returns `false` when the token is stale (the track was already skipped,
    /// replaced or stopped) and nothing changed.
    pub async fn track_finished(&self, token: TrackToken) -> bool {
        let mut st = self.state.lock().await;

        if st.state == PlaybackState::Idle || st.token != Some(token) {
            debug!("[{}] Fin de track obsoleto ignorado: {:?}", self.connection, token);
            return false;
        }

        info!("🎵 [{}] Track terminado, reproduciendo siguiente...", self.connection);
        if let Err(e) = self.advance_locked(&mut st).await {
            error!("Error al reproducir siguiente track: {}", e);
        }
        true
    }

    pub async fn pause(&self) -> Result<Transition> {
        let mut st = self.state.lock().await;
        if st.state != PlaybackState::Playing {
            return Ok(Transition::Ignored(st.state));
        }

        self.transport.pause().await?;
        st.state = PlaybackState::Paused;
        info!("⏸️ [{}] Reproducción pausada", self.connection);
        Ok(Transition::Applied)
    }

    pub async fn resume(&self) -> Result<Transition> {
        let mut st = self.state.lock().await;
        if st.state != PlaybackState::Paused {
            return Ok(Transition::Ignored(st.state));
        }

        self.transport.resume().await?;
        st.state = PlaybackState::Playing;
        self.arm_inactivity();
        info!("▶️ [{}] Reproducción reanudada", self.connection);
        Ok(Transition::Applied)
    }

    /// Detiene el track actual y pasa al siguiente de la cola (también en pausa).
    pub async fn skip(&self) -> Result<SkipOutcome> {
        let mut st = self.state.lock().await;
        if st.state == PlaybackState::Idle {
            return Ok(SkipOutcome::Ignored);
        }

        self.transport.stop().await?;
        let skipped = st.current.clone();
        info!(
            "⏭️ [{}] Saltando: {}",
            self.connection,
            skipped.as_ref().map_or("?", |e| e.title.as_str())
        );

        // Los fallos de los siguientes ya se emitieron como TrackFailed
        let next = self.advance_locked(&mut st).await.unwrap_or(None);
        Ok(SkipOutcome::Skipped { skipped, next })
    }

    /// Vuelve a reproducir una entrada de la caché sin tocar la cola.
    ///
    /// A missing file is reported as `NotFound` before the current track is
    /// touched.
    pub async fn replay(&self, entry: CacheEntry) -> Result<()> {
        let mut st = self.state.lock().await;

        if !tokio::fs::try_exists(&entry.file_path).await.unwrap_or(false) {
            return Err(missing_file(&entry));
        }

        if st.current.is_some() {
            self.transport.stop().await?;
        }

        if let Err(e) = self.start_locked(&mut st, entry.clone(), true).await {
            self.emit(SessionEvent::TrackFailed {
                entry,
                reason: e.to_string(),
            });
            if let Err(next) = self.advance_locked(&mut st).await {
                debug!("[{}] Tampoco arrancó la cola tras el replay: {}", self.connection, next);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Vacía la cola y detiene la reproducción. Devuelve cuántos tracks se descartaron.
    pub async fn stop(&self) -> Result<usize> {
        let mut st = self.state.lock().await;
        let drained = st.queue.drain();

        if st.current.is_some() {
            self.transport.stop().await?;
        }
        self.go_idle(&mut st);

        info!("⏹️ [{}] Reproducción detenida", self.connection);
        Ok(drained)
    }

    pub async fn set_volume(&self, volume: f32) -> Result<f32> {
        let clamped = volume.clamp(0.0, 2.0);
        let mut st = self.state.lock().await;
        self.transport.set_volume(clamped).await?;
        st.volume = clamped;
        Ok(clamped)
    }

    /// Libera el transporte y cancela el watchdog. La sesión no debe usarse después.
    pub async fn shutdown(&self) {
        self.monitor.cancel();
        let mut st = self.state.lock().await;
        st.queue.drain();

        if st.current.is_some() {
            if let Err(e) = self.transport.stop().await {
                warn!("⚠️ [{}] Error deteniendo el stream: {}", self.connection, e);
            }
        }
        self.go_idle(&mut st);

        if let Err(e) = self.transport.disconnect().await {
            warn!("⚠️ [{}] Error al desconectar: {}", self.connection, e);
        }
        info!("👋 [{}] Sesión cerrada", self.connection);
    }

    /// Saca tracks de la cola hasta que uno arranque o la cola se vacíe.
    ///
    /// When the queue runs out after at least one failed start, the session is
    /// idle and the last failure is returned.
    async fn advance_locked(&self, st: &mut SessionState) -> Result<Option<CacheEntry>> {
        let mut last_error = None;
        while let Some(item) = st.queue.dequeue() {
            let entry = item.entry;
            match self.start_locked(st, entry.clone(), false).await {
                Ok(()) => return Ok(Some(entry)),
                Err(e) => {
                    error!("❌ [{}] No se pudo reproducir {}: {}", self.connection, entry.title, e);
                    self.emit(SessionEvent::TrackFailed {
                        entry,
                        reason: e.to_string(),
                    });
                    last_error = Some(e);
                }
            }
        }

        self.go_idle(st);
        debug!("📭 [{}] Cola vacía, sesión inactiva", self.connection);
        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    async fn start_locked(&self, st: &mut SessionState, entry: CacheEntry, replay: bool) -> Result<()> {
        if !tokio::fs::try_exists(&entry.file_path).await.unwrap_or(false) {
            self.go_idle(st);
            return Err(missing_file(&entry));
        }

        st.issued_tokens += 1;
        let token = TrackToken(st.issued_tokens);
        self.active.pin(self.connection, entry.file_path.clone());
        st.current = Some(entry.clone());

        if let Err(e) = self.transport.start(&entry, token).await {
            self.go_idle(st);
            return Err(e);
        }

        st.token = Some(token);
        st.state = PlaybackState::Playing;
        self.arm_inactivity();

        info!(
            "{} [{}] {}",
            if replay { "🔄" } else { "🎵" },
            self.connection,
            entry.title
        );
        self.emit(SessionEvent::NowPlaying { entry, replay });
        Ok(())
    }

    fn go_idle(&self, st: &mut SessionState) {
        st.current = None;
        st.token = None;
        st.state = PlaybackState::Idle;
        self.active.unpin(self.connection);
    }

    fn arm_inactivity(&self) {
        let session = self.this.clone();
        self.monitor.arm(move |generation| async move {
            if let Some(session) = session.upgrade() {
                session.on_inactivity(generation).await;
            }
        });
    }

    async fn on_inactivity(&self, generation: u64) {
        let st = self.state.lock().await;

        if !self.monitor.is_current(generation) {
            debug!("[{}] Disparo de inactividad obsoleto ignorado", self.connection);
            return;
        }
        if st.state == PlaybackState::Playing {
            debug!("[{}] Inactividad disparada durante reproducción, ignorada", self.connection);
            return;
        }

        info!(
            "💤 [{}] Sin actividad durante {}, solicitando desconexión",
            self.connection,
            humantime::format_duration(self.monitor.timeout())
        );
        self.emit(SessionEvent::TeardownRequested);
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("[{}] Nadie escucha los eventos de la sesión", self.connection);
        }
    }
}

fn missing_file(entry: &CacheEntry) -> JukeboxError {
    JukeboxError::NotFound(format!(
        "{} (archivo {} eliminado)",
        entry.id,
        entry.file_path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::transport::testing::{Call, RecordingTransport};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(300);

    struct Fixture {
        dir: TempDir,
        transport: Arc<RecordingTransport>,
        active: ActiveFiles,
        session: Arc<PlaybackSession>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let transport = RecordingTransport::new();
        let active = ActiveFiles::new();
        let (tx, events) = mpsc::unbounded_channel();
        let session = PlaybackSession::new(
            ConnectionId(42),
            transport.clone(),
            active.clone(),
            TIMEOUT,
            0.5,
            tx,
        );
        Fixture {
            dir,
            transport,
            active,
            session,
            events,
        }
    }

    impl Fixture {
        fn entry(&self, id: &str) -> CacheEntry {
            let file_path = self.dir.path().join(format!("{id}.mp3"));
            std::fs::write(&file_path, b"audio").unwrap();
            CacheEntry {
                id: id.to_string(),
                title: format!("Song {id}"),
                source_url: String::new(),
                thumbnail_url: String::new(),
                duration_seconds: 180,
                file_path,
                created_at: Utc::now(),
            }
        }

        async fn play(&self, id: &str) -> PlayOutcome {
            self.session
                .enqueue_and_maybe_start(QueueItem::from(self.entry(id)))
                .await
                .unwrap()
        }

        async fn finish_current(&self) -> bool {
            let token = self.transport.last_token().unwrap();
            self.session.track_finished(token).await
        }

        fn drain_events(&mut self) -> Vec<SessionEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }

        async fn current_id(&self) -> Option<String> {
            self.session.now_playing().await.map(|e| e.id)
        }
    }

    #[tokio::test]
    async fn test_first_play_starts_and_rest_are_queued() {
        let mut fx = fixture();

        let first = fx.play("A").await;
        let second = fx.play("B").await;

        assert!(matches!(first, PlayOutcome::Started(ref e) if e.id == "A"));
        assert_eq!(second, PlayOutcome::Queued { position: 1 });
        assert_eq!(fx.session.state().await, PlaybackState::Playing);
        assert!(fx.active.is_active(&fx.dir.path().join("A.mp3")));

        let events = fx.drain_events();
        assert!(matches!(&events[..], [SessionEvent::NowPlaying { entry, replay: false }] if entry.id == "A"));
    }

    #[tokio::test]
    async fn test_track_finished_advances_then_goes_idle() {
        let fx = fixture();
        fx.play("A").await;
        fx.play("B").await;

        assert!(fx.finish_current().await);
        assert_eq!(fx.current_id().await.as_deref(), Some("B"));

        assert!(fx.finish_current().await);
        assert_eq!(fx.session.state().await, PlaybackState::Idle);
        assert_eq!(fx.current_id().await, None);
        assert!(!fx.active.is_active(&fx.dir.path().join("B.mp3")));
        assert_eq!(fx.transport.started_ids(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_stale_finish_is_ignored() {
        let fx = fixture();
        fx.play("A").await;
        let stale = fx.transport.last_token().unwrap();
        fx.play("B").await;
        fx.play("C").await;

        fx.session.skip().await.unwrap();
        assert!(!fx.session.track_finished(stale).await);

        assert_eq!(fx.current_id().await.as_deref(), Some("B"));
        assert_eq!(fx.session.list_queue().await.len(), 1);
    }

    #[tokio::test]
    async fn test_pause_and_resume_outside_valid_state_are_ignored() {
        let fx = fixture();

        assert_eq!(fx.session.pause().await.unwrap(), Transition::Ignored(PlaybackState::Idle));
        fx.play("A").await;
        assert_eq!(fx.session.resume().await.unwrap(), Transition::Ignored(PlaybackState::Playing));

        assert_eq!(fx.session.pause().await.unwrap(), Transition::Applied);
        assert_eq!(fx.session.pause().await.unwrap(), Transition::Ignored(PlaybackState::Paused));
        assert_eq!(fx.session.resume().await.unwrap(), Transition::Applied);

        let calls = fx.transport.calls();
        assert_eq!(&calls[1..], &[Call::Pause, Call::Resume]);
    }

    #[tokio::test]
    async fn test_skip_while_paused_advances_queue() {
        let fx = fixture();
        fx.play("A").await;
        fx.play("B").await;
        fx.session.pause().await.unwrap();

        let outcome = fx.session.skip().await.unwrap();

        match outcome {
            SkipOutcome::Skipped { skipped, next } => {
                assert_eq!(skipped.unwrap().id, "A");
                assert_eq!(next.unwrap().id, "B");
            }
            SkipOutcome::Ignored => panic!("skip while paused must advance"),
        }
        assert_eq!(fx.session.state().await, PlaybackState::Playing);
        assert!(fx.transport.calls().contains(&Call::Stop));
    }

    #[tokio::test]
    async fn test_skip_last_track_goes_idle_and_skip_when_idle_is_ignored() {
        let fx = fixture();
        fx.play("A").await;

        let outcome = fx.session.skip().await.unwrap();
        assert!(matches!(outcome, SkipOutcome::Skipped { next: None, .. }));
        assert_eq!(fx.session.state().await, PlaybackState::Idle);

        assert_eq!(fx.session.skip().await.unwrap(), SkipOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_replay_restarts_without_touching_queue() {
        let mut fx = fixture();
        fx.play("A").await;
        fx.play("B").await;
        let old = fx.entry("OLD");
        fx.drain_events();

        fx.session.replay(old).await.unwrap();

        assert_eq!(fx.current_id().await.as_deref(), Some("OLD"));
        assert_eq!(fx.session.list_queue().await.len(), 1);
        assert_eq!(fx.session.state().await, PlaybackState::Playing);
        let events = fx.drain_events();
        assert!(matches!(&events[..], [SessionEvent::NowPlaying { replay: true, .. }]));
    }

    #[tokio::test]
    async fn test_replay_from_idle_plays() {
        let fx = fixture();
        let entry = fx.entry("A");

        fx.session.replay(entry).await.unwrap();

        assert_eq!(fx.session.state().await, PlaybackState::Playing);
        assert_eq!(fx.transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_start_moves_to_next_track() {
        let mut fx = fixture();
        fx.transport.fail_on("A");
        fx.play("X").await;
        fx.play("A").await;
        fx.play("B").await;

        fx.finish_current().await;

        assert_eq!(fx.current_id().await.as_deref(), Some("B"));
        let failed: Vec<_> = fx
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::TrackFailed { entry, .. } => Some(entry.id),
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec!["A"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped() {
        let fx = fixture();
        fx.play("A").await;
        let gone = fx.entry("GONE");
        std::fs::remove_file(&gone.file_path).unwrap();
        fx.session.enqueue_and_maybe_start(QueueItem::from(gone)).await.unwrap();
        fx.play("C").await;

        fx.finish_current().await;

        assert_eq!(fx.current_id().await.as_deref(), Some("C"));
    }

    #[tokio::test]
    async fn test_play_into_idle_with_failing_transport_is_an_error() {
        let fx = fixture();
        fx.transport.fail_on("A");

        let err = fx
            .session
            .enqueue_and_maybe_start(QueueItem::from(fx.entry("A")))
            .await
            .unwrap_err();

        assert!(matches!(err, JukeboxError::Transport(ref msg) if msg == "no se pudo abrir A"));
        assert_eq!(fx.session.state().await, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_play_into_idle_with_missing_file_reports_not_found() {
        let fx = fixture();
        let gone = fx.entry("GONE");
        std::fs::remove_file(&gone.file_path).unwrap();

        let err = fx
            .session
            .enqueue_and_maybe_start(QueueItem::from(gone))
            .await
            .unwrap_err();

        assert!(matches!(err, JukeboxError::NotFound(ref msg) if msg.starts_with("GONE")));
        assert_eq!(fx.session.state().await, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_replay_of_missing_file_changes_nothing() {
        let mut fx = fixture();
        fx.play("A").await;
        fx.play("B").await;
        let gone = fx.entry("GONE");
        std::fs::remove_file(&gone.file_path).unwrap();
        fx.drain_events();

        let err = fx.session.replay(gone).await.unwrap_err();

        assert!(matches!(err, JukeboxError::NotFound(_)));
        assert_eq!(fx.current_id().await.as_deref(), Some("A"));
        assert_eq!(fx.session.state().await, PlaybackState::Playing);
        assert_eq!(fx.session.list_queue().await.len(), 1);
        assert!(!fx.transport.calls().contains(&Call::Stop));
        assert!(fx.drain_events().is_empty());
    }

    #[tokio::test]
    async fn test_stop_drains_queue_and_idles() {
        let fx = fixture();
        fx.play("A").await;
        fx.play("B").await;
        fx.play("C").await;

        assert_eq!(fx.session.stop().await.unwrap(), 2);
        assert_eq!(fx.session.state().await, PlaybackState::Idle);
        assert!(fx.session.list_queue().await.is_empty());
        assert!(!fx.active.is_active(&fx.dir.path().join("A.mp3")));
    }

    #[tokio::test]
    async fn test_volume_is_clamped() {
        let fx = fixture();
        assert_eq!(fx.session.set_volume(3.5).await.unwrap(), 2.0);
        assert_eq!(fx.transport.calls(), vec![Call::Volume(200)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_requests_teardown_after_timeout() {
        let mut fx = fixture();
        fx.play("A").await;
        fx.finish_current().await;
        fx.drain_events();

        tokio::time::sleep(TIMEOUT + Duration::from_secs(1)).await;

        assert_eq!(fx.drain_events(), vec![SessionEvent::TeardownRequested]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_while_playing_is_a_no_op() {
        let mut fx = fixture();
        fx.play("A").await;
        fx.drain_events();

        tokio::time::sleep(TIMEOUT * 2).await;

        assert!(fx.drain_events().is_empty());
        assert_eq!(fx.session.state().await, PlaybackState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fire_after_resume_does_not_tear_down() {
        let mut fx = fixture();
        fx.play("A").await;
        fx.drain_events();

        tokio::time::sleep(Duration::from_secs(50)).await;
        fx.session.pause().await.unwrap();
        tokio::time::sleep(Duration::from_secs(200)).await;
        fx.session.resume().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        fx.session.pause().await.unwrap();

        // El primer armado (t=300) fue reemplazado: no hay teardown aunque esté en pausa
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(fx.drain_events().is_empty());

        // El re-armado de t=250 vence en t=550
        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(fx.drain_events(), vec![SessionEvent::TeardownRequested]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_watchdog_and_disconnects() {
        let mut fx = fixture();
        fx.play("A").await;
        fx.drain_events();

        fx.session.shutdown().await;
        tokio::time::sleep(TIMEOUT * 2).await;

        assert!(fx.drain_events().is_empty());
        assert_eq!(fx.transport.calls().last(), Some(&Call::Disconnect));
        assert_eq!(fx.session.state().await, PlaybackState::Idle);
    }
}
