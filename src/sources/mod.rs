//! # Sources Module
//!
//! Resolution of user-supplied source references into cached audio files.
//!
//! The actual download is done by an external worker process (see
//! [`worker::WorkerFetcher`]). The core only talks to it through the
//! [`Fetcher`] trait, and only on a cache miss.

pub mod worker;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::LazyLock};
use url::Url;

use crate::{cache::CacheEntry, error::Result};

pub use worker::WorkerFetcher;

static VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z_-]{11}$").expect("video id regex is valid"));

/// Patrón laxo para referencias que no son URLs bien formadas.
static LOOSE_VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:v=|/)([0-9A-Za-z_-]{11})").expect("loose video id regex is valid")
});

/// Resolves a source reference into a downloaded file plus its metadata.
///
/// Implementations are slow and out-of-process; the cache calls them only
/// after a miss, at most once per id at a time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Descarga la referencia. Los fallos se devuelven como `JukeboxError::Fetch`.
    async fn fetch(&self, source_ref: &str) -> Result<FetchedTrack>;
}

/// Registro que devuelve el worker tras una descarga exitosa.
///
/// Field aliases accept the yt-dlp style names (`webpage_url`, `thumbnail`,
/// `duration`, `file`) that yt-dlp based worker scripts print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedTrack {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(alias = "webpage_url")]
    pub source_url: String,
    #[serde(alias = "thumbnail", default)]
    pub thumbnail_url: String,
    #[serde(alias = "duration", default, deserialize_with = "duration_secs")]
    pub duration_seconds: u64,
    #[serde(alias = "file")]
    pub file_path: PathBuf,
}

impl FetchedTrack {
    pub fn into_entry(self, id: String, file_path: PathBuf) -> CacheEntry {
        CacheEntry {
            id,
            title: self.title,
            source_url: self.source_url,
            thumbnail_url: self.thumbnail_url,
            duration_seconds: self.duration_seconds,
            file_path,
            created_at: chrono::Utc::now(),
        }
    }
}

/// yt-dlp reporta la duración como float; se redondea a segundos.
fn duration_secs<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.map_or(0, |secs| secs.max(0.0).round() as u64))
}

/// Extrae el ID estable de una referencia (el ID de video de YouTube).
///
/// Recognizes `watch?v=`, `youtu.be/`, `/shorts/`, `/embed/` and `/live/`
/// URLs as well as a bare 11-character id. References that do not parse as
/// URLs fall back to a loose `v=` / path-segment match.
pub fn derive_id(source_ref: &str) -> Option<String> {
    let source_ref = source_ref.trim();

    if VIDEO_ID.is_match(source_ref) {
        return Some(source_ref.to_string());
    }

    if let Ok(parsed) = Url::parse(source_ref) {
        if let Some(id) = id_from_url(&parsed) {
            return Some(id);
        }
    }

    LOOSE_VIDEO_ID
        .captures(source_ref)
        .map(|captures| captures[1].to_string())
}

fn id_from_url(url: &Url) -> Option<String> {
    let host = url.host_str()?;

    let candidate = if host == "youtu.be" {
        url.path_segments()?.next().map(str::to_string)
    } else if host.ends_with("youtube.com") {
        let from_query = url
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned());

        from_query.or_else(|| {
            let mut segments = url.path_segments()?;
            match segments.next()? {
                "shorts" | "embed" | "live" => segments.next().map(str::to_string),
                _ => None,
            }
        })
    } else {
        None
    };

    candidate.filter(|id| VIDEO_ID.is_match(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_derive_id_from_youtube_urls() {
        let expected = Some("dQw4w9WgXcQ".to_string());
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?list=PL123&v=dQw4w9WgXcQ&t=42s",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "  dQw4w9WgXcQ ",
        ] {
            assert_eq!(derive_id(url), expected, "{url}");
        }
    }

    #[test]
    fn test_derive_id_loose_fallback() {
        assert_eq!(
            derive_id("youtube.com/watch?v=9bZkp7q19f0"),
            Some("9bZkp7q19f0".to_string())
        );
    }

    #[test]
    fn test_derive_id_rejects_references_without_id() {
        assert_eq!(derive_id("https://example.com/song"), None);
        assert_eq!(derive_id("never gonna give you up"), None);
        assert_eq!(derive_id(""), None);
    }

    #[test]
    fn test_fetched_track_accepts_worker_field_names() {
        let json = r#"{
            "title": "Gangnam Style",
            "webpage_url": "https://www.youtube.com/watch?v=9bZkp7q19f0",
            "thumbnail": "https://i.ytimg.com/vi/9bZkp7q19f0/hqdefault.jpg",
            "duration": 252.6,
            "file": "cache/9bZkp7q19f0.mp3"
        }"#;

        let track: FetchedTrack = serde_json::from_str(json).unwrap();
        assert_eq!(track.id, None);
        assert_eq!(track.duration_seconds, 253);
        assert_eq!(track.file_path, PathBuf::from("cache/9bZkp7q19f0.mp3"));
    }
}
