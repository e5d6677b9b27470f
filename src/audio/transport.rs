use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info};

use super::{ConnectionId, TrackToken};
use crate::{cache::CacheEntry, error::Result};

/// Seam to the voice transport that streams a cached file into a channel.
///
/// Implementations must not call back into the session from inside these
/// methods. The end of a stream is reported asynchronously, with the token
/// given to `start`, through `AudioPlayer::track_finished`.
#[async_trait]
pub trait AudioTransport: Send + Sync {
    async fn start(&self, entry: &CacheEntry, token: TrackToken) -> Result<()>;

    /// Detiene el stream actual sin reportar su final.
    async fn stop(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    async fn set_volume(&self, _volume: f32) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()>;
}

/// Fin de un track reportado por el transporte simulado.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackEnded {
    pub connection: ConnectionId,
    pub token: TrackToken,
}

struct SimulatedTrack {
    task: JoinHandle<()>,
    paused: Arc<AtomicBool>,
}

/// Transporte sin audio real: cuenta la duración del track y reporta su fin.
///
/// Used by the console front-end. Playback advances one tick per
/// `tick` of wall time, paused ticks do not count, and the end is sent on
/// the channel given at construction.
pub struct SimulatedTransport {
    connection: ConnectionId,
    tick: Duration,
    ended: mpsc::UnboundedSender<TrackEnded>,
    current: Mutex<Option<SimulatedTrack>>,
}

impl SimulatedTransport {
    pub fn new(connection: ConnectionId, tick: Duration, ended: mpsc::UnboundedSender<TrackEnded>) -> Self {
        Self {
            connection,
            tick,
            ended,
            current: Mutex::new(None),
        }
    }

    fn abort_current(&self) {
        if let Some(track) = self.current.lock().take() {
            track.task.abort();
        }
    }
}

#[async_trait]
impl AudioTransport for SimulatedTransport {
    async fn start(&self, entry: &CacheEntry, token: TrackToken) -> Result<()> {
        self.abort_current();

        let paused = Arc::new(AtomicBool::new(false));
        let mut remaining = entry.duration_seconds.max(1);
        let tick = self.tick;
        let ended = self.ended.clone();
        let connection = self.connection;
        let task_paused = paused.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.tick().await;
            while remaining > 0 {
                interval.tick().await;
                if !task_paused.load(Ordering::Relaxed) {
                    remaining -= 1;
                }
            }
            let _ = ended.send(TrackEnded { connection, token });
        });

        *self.current.lock() = Some(SimulatedTrack { task, paused });
        info!("🔊 [{}] Streaming {}", self.connection, entry.file_path.display());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.abort_current();
        debug!("⏹️ [{}] Stream detenido", self.connection);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        if let Some(track) = self.current.lock().as_ref() {
            track.paused.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        if let Some(track) = self.current.lock().as_ref() {
            track.paused.store(false, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<()> {
        info!("🔊 [{}] Volumen ajustado a {}%", self.connection, (volume * 100.0) as u32);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.abort_current();
        info!("👋 [{}] Desconectado del canal de voz", self.connection);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Transporte de prueba que registra cada llamada.

    use super::*;
    use crate::error::JukeboxError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Start(String, TrackToken),
        Stop,
        Pause,
        Resume,
        Volume(u32),
        Disconnect,
    }

    #[derive(Default)]
    pub struct RecordingTransport {
        calls: Mutex<Vec<Call>>,
        /// IDs cuyo `start` falla
        failing: Mutex<Vec<String>>,
    }

    impl RecordingTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn fail_on(&self, id: &str) {
            self.failing.lock().push(id.to_string());
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn last_token(&self) -> Option<TrackToken> {
            self.calls.lock().iter().rev().find_map(|call| match call {
                Call::Start(_, token) => Some(*token),
                _ => None,
            })
        }

        pub fn started_ids(&self) -> Vec<String> {
            self.calls
                .lock()
                .iter()
                .filter_map(|call| match call {
                    Call::Start(id, _) => Some(id.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl AudioTransport for RecordingTransport {
        async fn start(&self, entry: &CacheEntry, token: TrackToken) -> Result<()> {
            if self.failing.lock().contains(&entry.id) {
                return Err(JukeboxError::Transport(format!("no se pudo abrir {}", entry.id)));
            }
            self.calls.lock().push(Call::Start(entry.id.clone(), token));
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.calls.lock().push(Call::Stop);
            Ok(())
        }

        async fn pause(&self) -> Result<()> {
            self.calls.lock().push(Call::Pause);
            Ok(())
        }

        async fn resume(&self) -> Result<()> {
            self.calls.lock().push(Call::Resume);
            Ok(())
        }

        async fn set_volume(&self, volume: f32) -> Result<()> {
            self.calls.lock().push(Call::Volume((volume * 100.0).round() as u32));
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.calls.lock().push(Call::Disconnect);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test(start_paused = true)]
    async fn test_simulated_track_reports_end_and_respects_pause() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = SimulatedTransport::new(ConnectionId(1), Duration::from_secs(1), tx);
        let entry = CacheEntry {
            id: "dQw4w9WgXcQ".to_string(),
            title: "Never Gonna Give You Up".to_string(),
            source_url: String::new(),
            thumbnail_url: String::new(),
            duration_seconds: 3,
            file_path: "cache/dQw4w9WgXcQ.mp3".into(),
            created_at: Utc::now(),
        };

        transport.start(&entry, TrackToken(7)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        transport.pause().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());

        transport.resume().await.unwrap();
        let ended = rx.recv().await.unwrap();
        assert_eq!(ended, TrackEnded { connection: ConnectionId(1), token: TrackToken(7) });
    }
}
