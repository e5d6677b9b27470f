//! # Cache Module
//!
//! Bounded on-disk cache of downloaded audio for the jukebox.
//!
//! Every cached track is a file in a flat asset directory plus one entry in
//! a JSON metadata index keyed by the track id (the YouTube video id for
//! YouTube sources). The cache is bounded by a byte budget that is enforced
//! best-effort by evicting the oldest entries first.
//!
//! ## Components
//!
//! - [`store::CacheStore`]: lookup, insertion, eviction and budget control
//! - [`budget`]: size-string parsing and eviction reports
//! - [`ActiveFiles`]: files currently streamed by some voice session; these
//!   are never evicted
//!
//! ## Persisted layout
//!
//! ```text
//! cache/
//! ├── dQw4w9WgXcQ.mp3
//! ├── 9bZkp7q19f0.mp3
//! ├── metadata.json       # { "<id>": CacheEntry, ... }
//! └── cache_limit.txt     # budget in bytes
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! # use jukebox::cache::{store::CacheStore, ActiveFiles};
//! # async fn example(store: CacheStore) -> anyhow::Result<()> {
//! if let Some(entry) = store.lookup("dQw4w9WgXcQ").await {
//!     println!("Cache hit: {}", entry.title);
//! }
//!
//! let report = store.set_budget(500 * 1024 * 1024).await?;
//! println!("Cache: {}", report);
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod store;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::audio::ConnectionId;

pub use budget::{parse_size, BudgetReport};

/// A cached track: metadata plus the local file that backs it.
///
/// Entries are immutable once created. They leave the index only together
/// with their file, through eviction or a cache clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Stable identifier derived from the source reference
    pub id: String,
    pub title: String,
    /// Page the track was fetched from
    pub source_url: String,
    pub thumbnail_url: String,
    pub duration_seconds: u64,
    /// Location of the audio file inside the asset directory
    pub file_path: PathBuf,
    /// When the entry was added; eviction removes the smallest first
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }
}

/// Índice en memoria `id -> CacheEntry`, persistido como un único documento JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheIndex {
    entries: HashMap<String, CacheEntry>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn insert(&mut self, id: String, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(id, entry)
    }

    pub fn remove(&mut self, id: &str) -> Option<CacheEntry> {
        self.entries.remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn as_map(&self) -> &HashMap<String, CacheEntry> {
        &self.entries
    }

    /// Entradas ordenadas de la más antigua a la más reciente.
    pub fn oldest_first(&self) -> Vec<&CacheEntry> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        entries
    }
}

/// Files that some voice session is streaming right now.
///
/// Each session pins the file of its current item and unpins it when the
/// item changes or the session ends. Eviction skips any pinned file.
#[derive(Debug, Clone, Default)]
pub struct ActiveFiles {
    pinned: Arc<DashMap<ConnectionId, PathBuf>>,
}

impl ActiveFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin(&self, connection: ConnectionId, path: PathBuf) {
        self.pinned.insert(connection, path);
    }

    pub fn unpin(&self, connection: ConnectionId) {
        self.pinned.remove(&connection);
    }

    pub fn is_active(&self, path: &Path) -> bool {
        self.pinned.iter().any(|pinned| pinned.value() == path)
    }
}

/// Resumen del estado de la caché para el front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
    pub entries: usize,
    pub used_bytes: u64,
    pub budget_bytes: u64,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "📦 {} canciones en caché, {} de {} usados",
            self.entries,
            budget::format_bytes(self.used_bytes),
            budget::format_bytes(self.budget_bytes)
        )
    }
}
