use std::{fmt, time::Duration};

use crate::{
    audio::{queue::QueueItem, session::SessionSnapshot},
    cache::{store::ClearReport, BudgetReport, CacheEntry, CacheStatus},
};

/// Footer estandarizado para todas las tarjetas
const STANDARD_FOOTER: &str = "🎵 Jukebox";

/// Mensaje enriquecido de texto plano: título, enlace, campos y miniatura.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Card {
    pub title: String,
    pub url: Option<String>,
    pub description: Option<String>,
    pub fields: Vec<(String, String)>,
    pub thumbnail: Option<String>,
}

impl Card {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        if !url.is_empty() {
            self.url = Some(url);
        }
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        let thumbnail = thumbnail.into();
        if !thumbnail.is_empty() {
            self.thumbnail = Some(thumbnail);
        }
        self
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "┌ {}", self.title)?;
        if let Some(url) = &self.url {
            writeln!(f, "│ {}", url)?;
        }
        if let Some(description) = &self.description {
            writeln!(f, "│ {}", description)?;
        }
        for (name, value) in &self.fields {
            writeln!(f, "│ {}: {}", name, value)?;
        }
        if let Some(thumbnail) = &self.thumbnail {
            writeln!(f, "│ 🖼️ {}", thumbnail)?;
        }
        write!(f, "└ {}", STANDARD_FOOTER)
    }
}

/// Tarjeta de "reproduciendo ahora" (o "repitiendo" para replays).
pub fn now_playing_card(entry: &CacheEntry, replay: bool) -> Card {
    Card::new(format!("🎵 {}", entry.title))
        .url(entry.source_url.as_str())
        .description(if replay { "Repitiendo" } else { "Reproduciendo ahora" })
        .field("⏱️ Duración", format_duration(entry.duration()))
        .field("🆔 ID", entry.id.as_str())
        .thumbnail(entry.thumbnail_url.as_str())
}

/// Estado completo de la sesión: canción actual y resumen de la cola.
pub fn session_card(snapshot: &SessionSnapshot) -> Card {
    let mut card = match &snapshot.current {
        Some(entry) => now_playing_card(entry, false).description(format!("Estado: {}", snapshot.state)),
        None => Card::new("🔇 Nada en reproducción").description(format!("Estado: {}", snapshot.state)),
    };

    card = card.field("🔊 Volumen", format!("{}%", (snapshot.volume * 100.0).round() as u32));
    if !snapshot.queue.is_empty() {
        card = card.field(
            "📋 En cola",
            format!(
                "{} canciones ({})",
                snapshot.queue.len(),
                format_duration(snapshot.queue_duration)
            ),
        );
    }
    card
}

/// Lista de la cola como "Song N: título", empezando en 1.
pub fn queue_card(items: &[QueueItem]) -> Card {
    if items.is_empty() {
        return Card::new("📋 Cola").description("La cola está vacía.");
    }

    items
        .iter()
        .enumerate()
        .fold(Card::new("📋 Cola actual"), |card, (idx, item)| {
            let value = match &item.requested_by {
                Some(user) => format!("{} [{}] (pedida por {})", item.entry.title, item.entry.source_url, user),
                None => format!("{} [{}]", item.entry.title, item.entry.source_url),
            };
            card.field(format!("Song {}", idx + 1), value)
        })
}

pub fn cache_status_card(status: &CacheStatus) -> Card {
    Card::new("🗄️ Caché").description(status.to_string())
}

pub fn budget_card(report: &BudgetReport) -> Card {
    let mut card = Card::new("📏 Límite de caché").description(report.to_string());
    if !report.evicted.is_empty() {
        card = card.field("🧹 Eliminadas", report.evicted.join(", "));
    }
    if report.unenforceable {
        card = card.field("⚠️ Aviso", "No se pudo liberar más espacio: los archivos restantes están en uso");
    }
    card
}

pub fn clear_card(report: &ClearReport) -> Card {
    let card = Card::new("🗑️ Caché limpiada").field("Archivos borrados", report.removed_files.to_string());
    if report.kept_entries > 0 {
        card.field("En reproducción (conservados)", report.kept_entries.to_string())
    } else {
        card
    }
}

pub fn error_card(message: impl Into<String>) -> Card {
    Card::new("❌ Error").description(message)
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
