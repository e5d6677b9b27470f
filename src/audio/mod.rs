//! # Audio Module
//!
//! Playback sessions for the jukebox: one per voice connection.
//!
//! ## Architecture
//!
//! ### [`player`] - Session registry and command surface
//! - Keyed registry `ConnectionId -> PlaybackSession`
//! - Resolves play requests through the cache and forwards control commands
//!
//! ### [`session`] - Playback state machine
//! - `Idle`, `Playing` and `Paused`, driven by commands and track-end events
//! - Pins the current file so the cache never evicts it
//!
//! ### [`queue`] - FIFO of resolved tracks
//!
//! ### [`inactivity`] - Rearmable idle watchdog requesting teardown
//!
//! ### [`transport`] - Seam to the external audio transport
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! # use jukebox::audio::{player::AudioPlayer, ConnectionId};
//! # async fn example(player: AudioPlayer, transport: std::sync::Arc<dyn jukebox::audio::transport::AudioTransport>) -> anyhow::Result<()> {
//! let connection = ConnectionId(123456789);
//! let mut events = player.connect(connection, transport)?;
//!
//! player.resolve_and_play(connection, "https://youtu.be/dQw4w9WgXcQ", None).await?;
//! player.pause(connection).await?;
//! player.resume(connection).await?;
//! player.skip(connection).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod inactivity;
pub mod player;
pub mod queue;
pub mod session;
pub mod transport;

use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;

/// Identificador de una conexión de voz (p. ej. el ID de la guild).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token issued for every transport start.
///
/// The transport hands it back when the stream ends; a finish carrying any
/// other token is stale and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackToken(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PlaybackState::Idle => "inactivo",
            PlaybackState::Playing => "reproduciendo",
            PlaybackState::Paused => "en pausa",
        };
        f.write_str(label)
    }
}

/// Señales que la sesión emite hacia el front-end.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    NowPlaying { entry: CacheEntry, replay: bool },
    /// The transport could not start the track; the session moved on
    TrackFailed { entry: CacheEntry, reason: String },
    /// The idle watchdog fired while nothing was playing
    TeardownRequested,
}

/// Result of a command that is only valid in some states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The command did not apply in the current state; nothing changed
    Ignored(PlaybackState),
}
